use crelay_core::RelayError;
use serde_json::Value as Json;
use tracing::debug;

use crate::strategy::{CollectionReplacement, Mutation, StatusReplacement};

/// Pick the mutation strategy from the outermost shape of a completion payload.
///
/// Sequences replace the subsets collection, keyed records replace the status
/// section; every other shape is rejected without a fallback.
pub fn classify(payload: Json) -> Result<Mutation, RelayError> {
    let mutation = match payload {
        Json::Array(items) => Mutation::ReplaceSubsets(CollectionReplacement::new(items)),
        Json::Object(record) => Mutation::ReplaceStatus(StatusReplacement::new(record)),
        other => return Err(RelayError::UnsupportedPayloadShape(json_type_name(&other))),
    };
    debug!(strategy = ?crate::ApplyMutation::kind(&mutation), "payload classified");
    Ok(mutation)
}

pub fn json_type_name(v: &Json) -> &'static str {
    match v {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn arrays_select_collection_replacement() {
        match classify(json!([{"id": 1}, {"id": 2}])).expect("array ok") {
            Mutation::ReplaceSubsets(s) => assert_eq!(s.subsets().len(), 2),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(classify(json!([])), Ok(Mutation::ReplaceSubsets(_))));
    }

    #[test]
    fn records_select_status_replacement() {
        match classify(json!({"score": 0.93})).expect("object ok") {
            Mutation::ReplaceStatus(s) => assert_eq!(s.status().get("score"), Some(&json!(0.93))),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(classify(json!({})), Ok(Mutation::ReplaceStatus(_))));
    }

    #[test]
    fn scalars_and_null_are_rejected() {
        for (payload, name) in [
            (json!("just a string"), "string"),
            (json!(null), "null"),
            (json!(42), "number"),
            (json!(true), "boolean"),
        ] {
            match classify(payload) {
                Err(RelayError::UnsupportedPayloadShape(got)) => assert_eq!(got, name),
                other => panic!("unexpected {:?}", other),
            }
        }
    }
}
