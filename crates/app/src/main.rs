use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use crelay_api::config::RelayArgs;
use crelay_api::http::{router, HttpConfig};
use crelay_kubehub::KubeStore;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "crelay", version, about = "Resource completion relay")]
struct Cli {
    /// Listen port
    #[arg(long = "port", env = "PORT", default_value_t = 8080)]
    port: u16,

    /// Full listen address; overrides --port
    #[arg(long = "bind")]
    bind: Option<SocketAddr>,

    /// Maximum in-flight requests
    #[arg(long = "concurrency-limit", env = "CRELAY_CONCURRENCY_LIMIT")]
    concurrency_limit: Option<usize>,

    #[command(flatten)]
    relay: RelayArgs,
}

fn init_tracing() {
    let env = std::env::var("CRELAY_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("CRELAY_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<SocketAddr>() {
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

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let store = Arc::new(KubeStore::connect().await?);
    let inference = cli.relay.inference(store.clone()).context("building inference proxy")?;
    let relay = cli.relay.build(store).context("invalid kind configuration")?;
    let tokens: Vec<&str> = relay.kinds().tokens().collect();
    info!(kinds = ?tokens, "kind table ready");

    let app = router(Arc::new(relay), Arc::new(inference), &HttpConfig { concurrency_limit: cli.concurrency_limit.filter(|n| *n > 0) });
    let addr = cli.bind.unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], cli.port)));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!(addr = %addr, "crelay listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}
