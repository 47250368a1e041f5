use std::io::Read;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use crelay_api::config::RelayArgs;
use crelay_api::{RelayRequest, TriggerRef};
use crelay_apply::ApplyMutation;
use crelay_core::ResourceCoordinate;
use crelay_kubehub::KubeStore;
use serde_json::Value;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "crelayctl", version, about = "crelay operator CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Kubernetes namespace
    #[arg(long = "ns", global = true, default_value = "default")]
    namespace: String,

    #[command(flatten)]
    relay: RelayArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply a completion payload to a target and delete its trigger
    Relay {
        /// Short kind token, e.g. "datasets"
        kind: String,
        /// Target object name
        name: String,
        /// Trigger as "group/version/resource/name" ("version/resource/name" for core)
        #[arg(long = "trigger", conflicts_with = "obj_name", required_unless_present = "obj_name")]
        trigger: Option<String>,
        /// Trigger name under the target's own resource
        #[arg(long = "obj-name")]
        obj_name: Option<String>,
        /// JSON payload file; "-" reads stdin
        #[arg(short = 'f', long = "file", default_value = "-")]
        file: PathBuf,
    },
    /// Print the coordinate a kind token resolves to
    Resolve {
        kind: String,
        /// Object name (defaults to "<name>")
        name: Option<String>,
    },
    /// Print the strategy a payload would select
    Classify {
        /// JSON payload file; "-" reads stdin
        #[arg(short = 'f', long = "file", default_value = "-")]
        file: PathBuf,
    },
    /// List label-selected services in the namespace
    Services,
}

fn init_tracing() {
    let env = std::env::var("CRELAY_LOG").unwrap_or_else(|_| "warn".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("CRELAY_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid CRELAY_METRICS_ADDR; expected host:port");
        }
    }
}

fn read_payload(file: &PathBuf) -> Result<Value> {
    let text = if file.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).context("reading payload from stdin")?;
        buf
    } else {
        std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?
    };
    serde_json::from_str(&text).context("payload is not valid JSON")
}

fn parse_trigger(key: &str, namespace: &str) -> Option<ResourceCoordinate> {
    let parts: Vec<&str> = key.split('/').collect();
    match parts.as_slice() {
        [version, resource, name] => Some(ResourceCoordinate::new("", *version, *resource, namespace, *name)),
        [group, version, resource, name] => Some(ResourceCoordinate::new(*group, *version, *resource, namespace, *name)),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let ns = cli.namespace.as_str();

    match cli.command {
        Commands::Relay { kind, name, trigger, obj_name, file } => {
            let payload = read_payload(&file)?;
            let trigger = match (trigger, obj_name) {
                (Some(key), _) => TriggerRef::Explicit(
                    parse_trigger(&key, ns).with_context(|| format!("invalid trigger {:?}", key))?,
                ),
                (None, Some(name)) => TriggerRef::SameResource { name },
                (None, None) => anyhow::bail!("one of --trigger or --obj-name is required"),
            };
            info!(kind = %kind, ns = %ns, name = %name, "relay invoked");
            let store = Arc::new(KubeStore::connect().await?);
            let relay = cli.relay.build(store)?;
            let req = RelayRequest {
                short_kind: kind,
                namespace: ns.to_string(),
                target_name: name,
                trigger,
                payload,
            };
            match relay.relay(req).await {
                Ok(out) => match cli.output {
                    Output::Human => {
                        println!("{}", out.message());
                        println!("strategy: {}  rv: {}  trigger: {} ({:?})", out.strategy.as_str(), out.resource_version.as_str(), out.trigger, out.cleanup);
                    }
                    Output::Json => println!("{}", serde_json::to_string_pretty(&out)?),
                },
                Err(e) => {
                    error!(error = %e, kind = e.kind().as_str(), "relay failed");
                    eprintln!("relay error [{}]: {}", e.kind().as_str(), e);
                    if e.mutation_committed() {
                        eprintln!("note: the target was updated; only trigger cleanup failed");
                    }
                    std::process::exit(1);
                }
            }
        }
        Commands::Resolve { kind, name } => {
            let table = cli.relay.kind_table()?;
            match table.resolve(&kind) {
                Ok(target) => {
                    let at = target.at(ns, name.as_deref().unwrap_or("<name>"));
                    match cli.output {
                        Output::Human => println!("{}", at),
                        Output::Json => println!("{}", serde_json::to_string_pretty(&at)?),
                    }
                }
                Err(e) => {
                    let known: Vec<&str> = table.tokens().collect();
                    eprintln!("{} (known: {})", e, known.join(", "));
                    std::process::exit(1);
                }
            }
        }
        Commands::Classify { file } => {
            let payload = read_payload(&file)?;
            match crelay_apply::classify(payload) {
                Ok(m) => match cli.output {
                    Output::Human => println!("{}", m.kind().as_str()),
                    Output::Json => println!("{}", serde_json::json!({ "strategy": m.kind() })),
                },
                Err(e) => {
                    eprintln!("{}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Services => {
            let store = Arc::new(KubeStore::connect().await?);
            let relay = cli.relay.build(store)?;
            let items = relay.list_services(ns).await?;
            match cli.output {
                Output::Human => {
                    println!("NAMESPACE   NAME");
                    for item in &items {
                        let name = item["metadata"]["name"].as_str().unwrap_or("-");
                        println!("{:<11} {}", ns, name);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "items": items }))?),
            }
        }
    }
    Ok(())
}
