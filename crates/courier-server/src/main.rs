use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use courier_agents::{EchoLlmClient, HttpLlmClient, LlmClient, LogMailClient};
use courier_observability::{canonical_logs_dir_from_root, init_process_logging, ProcessKind};
use courier_server::{build_state, serve};
use courier_types::CourierConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let root = std::env::var("COURIER_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."));
    let (_guard, info) =
        init_process_logging(ProcessKind::Server, &canonical_logs_dir_from_root(&root), 14)?;
    tracing::info!(logs_dir = %info.logs_dir, "logging initialized");

    let config = CourierConfig::load(root.join("courier.yaml"))?;
    if config.webhook.signing_key.is_empty() {
        tracing::warn!("no webhook signing key configured; inbound webhooks will be rejected");
    }

    let client: Arc<dyn LlmClient> = match std::env::var("COURIER_LLM_BASE_URL") {
        Ok(base_url) => Arc::new(HttpLlmClient::new(
            base_url,
            std::env::var("COURIER_LLM_API_KEY").ok(),
        )?),
        Err(_) => {
            tracing::warn!("COURIER_LLM_BASE_URL not set, using the echo client");
            Arc::new(EchoLlmClient)
        }
    };

    let dlq_path = root.join(&config.dlq.db_path);
    let state = build_state(config, client, Arc::new(LogMailClient), dlq_path).await?;

    let addr: SocketAddr = std::env::var("COURIER_LISTEN_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:8700".to_string())
        .parse()?;
    serve(state, addr).await
}
