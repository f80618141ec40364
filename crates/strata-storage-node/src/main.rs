use std::net::SocketAddr;
use std::sync::Arc;

use strata_storage_node::config::NodeConfig;
use strata_storage_node::control::HttpControlNode;
use strata_storage_node::node::StorageNode;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "strata_storage_node=debug,tower_http=debug".into()),
        )
        .init();

    let config = NodeConfig::from_env()?;
    let control = Arc::new(HttpControlNode::new(config.control_url.clone()));
    let node = StorageNode::start(&config, control).await?;

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Strata storage node {} listening on {}", config.node_serial, addr);
    info!("Storage: {} (max {} MB)", config.storage_dir.display(), config.max_storage_mb);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, node.router())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    node.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
