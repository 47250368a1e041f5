//! Chat proxy to the serve service fronting an inference RayService.

use std::sync::Arc;
use std::time::Duration;

use crelay_core::{KindTarget, ObjectStore, StoreError};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::{debug, warn};

pub const DEFAULT_CLUSTER_DOMAIN: &str = "svc.cluster.local";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// OpenAI-style completion request sent to the serve service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

/// Condensed completion returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub output: String,
    pub token_length: Json,
    pub elapsed_time: Json,
    pub token_per_sec: Json,
}

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("missing or invalid 'input' field in the request body")]
    InvalidInput,
    #[error("inference service not found: {0}")]
    ServiceNotFound(String),
    #[error("{0} has no spec.serveService.name")]
    NoServeService(String),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("inference backend failed: {0}")]
    Upstream(String),
}

impl InferenceError {
    pub fn kind(&self) -> &'static str {
        match self {
            InferenceError::InvalidInput => "InvalidInput",
            InferenceError::ServiceNotFound(_) => "ServiceNotFound",
            InferenceError::NoServeService(_) => "NoServeService",
            InferenceError::StoreUnavailable(_) => "StoreUnavailable",
            InferenceError::Upstream(_) => "UpstreamFailed",
        }
    }
}

/// Transport for completion requests.
#[async_trait::async_trait]
pub trait ChatForwarder: Send + Sync {
    async fn forward(&self, url: &str, body: &ChatRequest) -> Result<Json, String>;
}

/// `reqwest`-backed forwarder.
pub struct HttpForwarder {
    client: reqwest::Client,
}

impl HttpForwarder {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl ChatForwarder for HttpForwarder {
    async fn forward(&self, url: &str, body: &ChatRequest) -> Result<Json, String> {
        let resp = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| e.to_string())?
            .error_for_status()
            .map_err(|e| e.to_string())?;
        resp.json::<Json>().await.map_err(|e| e.to_string())
    }
}

/// Looks up the serve service of a RayService and forwards a single-turn chat to it.
pub struct InferenceProxy {
    store: Arc<dyn ObjectStore>,
    services: KindTarget,
    cluster_domain: String,
    forwarder: Arc<dyn ChatForwarder>,
}

impl InferenceProxy {
    pub fn new(store: Arc<dyn ObjectStore>, services: KindTarget, forwarder: Arc<dyn ChatForwarder>) -> Self {
        Self { store, services, cluster_domain: DEFAULT_CLUSTER_DOMAIN.to_string(), forwarder }
    }

    pub fn with_cluster_domain(mut self, domain: impl Into<String>) -> Self {
        self.cluster_domain = domain.into();
        self
    }

    pub async fn chat(&self, namespace: &str, service: &str, body: &Json) -> Result<ChatReply, InferenceError> {
        counter!("inference_requests", 1u64);
        let res = self.chat_inner(namespace, service, body).await;
        if let Err(e) = &res {
            counter!("inference_err", 1u64, "kind" => e.kind());
        }
        res
    }

    async fn chat_inner(&self, namespace: &str, service: &str, body: &Json) -> Result<ChatReply, InferenceError> {
        let input = body.get("input").and_then(Json::as_str).ok_or(InferenceError::InvalidInput)?;

        let at = self.services.at(namespace, service);
        let obj = self.store.get(&at).await.map_err(|e| match e {
            StoreError::NotFound => InferenceError::ServiceNotFound(at.to_string()),
            other => InferenceError::StoreUnavailable(other.to_string()),
        })?;
        let serve = obj
            .raw
            .pointer("/spec/serveService/name")
            .and_then(Json::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| InferenceError::NoServeService(at.to_string()))?;

        let url = format!("http://{}.{}.{}/chat/completions", serve, namespace, self.cluster_domain);
        let req = ChatRequest {
            model: serve.to_string(),
            messages: vec![ChatMessage { role: "user".into(), content: input.to_string() }],
        };
        debug!(url = %url, service = %at, "forwarding chat");
        let resp = self.forwarder.forward(&url, &req).await.map_err(|e| {
            warn!(url = %url, error = %e, "chat forward failed");
            InferenceError::Upstream(e)
        })?;
        reply_from(&resp)
    }
}

fn reply_from(resp: &Json) -> Result<ChatReply, InferenceError> {
    let output = resp
        .pointer("/choices/0/message/content")
        .and_then(Json::as_str)
        .ok_or_else(|| InferenceError::Upstream("response has no choices[0].message.content".into()))?;
    let usage = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| resp.get("usage").and_then(|u| u.get(*k)))
            .cloned()
            .unwrap_or(Json::Null)
    };
    Ok(ChatReply {
        output: output.to_string(),
        token_length: usage(&["total_tokens"]),
        // serve backends spell it "elasped_time"
        elapsed_time: usage(&["elasped_time", "elapsed_time"]),
        token_per_sec: usage(&["token_per_sec"]),
    })
}
