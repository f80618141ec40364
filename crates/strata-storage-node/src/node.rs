use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use strata_crypto::certs::CertificateCache;
use strata_types::models::NodeStatus;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::SOFTWARE;
use crate::config::NodeConfig;
use crate::context::NodeContext;
use crate::control::ControlNode;
use crate::integrity;
use crate::registration::{RegistrationConfig, RegistrationUpdater};
use crate::routes::{self, AppState};
use crate::sending_queue::{DEFAULT_SLEEP_PERIOD, HttpPeerClient, PeerClient, SendingQueue};
use crate::storage::ChunkStore;

/// A running storage node: HTTP state plus its background loops.
pub struct StorageNode {
    state: AppState,
    registration: RegistrationUpdater,
    integrity_cancel: CancellationToken,
    integrity_handle: Mutex<Option<JoinHandle<()>>>,
}

impl StorageNode {
    /// Load certificates from the control node, open the store and start the
    /// sending queue, registration and integrity loops.
    pub async fn start(config: &NodeConfig, control: Arc<dyn ControlNode>) -> Result<Self> {
        Self::start_with_peer(config, control, Arc::new(HttpPeerClient::new())).await
    }

    pub async fn start_with_peer(
        config: &NodeConfig,
        control: Arc<dyn ControlNode>,
        peer: Arc<dyn PeerClient>,
    ) -> Result<Self> {
        let ctx = Arc::new(NodeContext::new(config.node_serial));
        let archive = control
            .get_certificates()
            .await
            .context("fetching certificates from control node")?;
        ctx.set_certificates(CertificateCache::from_archive(&archive).context("loading certificate archive")?);
        info!("Certificates loaded");

        let store = Arc::new(ChunkStore::new(config.storage_dir.clone()).await?);

        let sending = Arc::new(SendingQueue::new(
            peer,
            ctx.clone(),
            config.send_concurrency,
            DEFAULT_SLEEP_PERIOD,
        ));
        sending.start();

        let mut reg_config = RegistrationConfig::new(config.port, SOFTWARE, config.max_storage_mb);
        reg_config.heartbeat_interval = config.heartbeat_interval;
        let registration = RegistrationUpdater::new(control.clone(), ctx.clone(), store.clone(), reg_config);
        registration.start();

        let integrity_cancel = CancellationToken::new();
        let integrity_handle = tokio::spawn(integrity::run_integrity_loop(
            store.clone(),
            control.clone(),
            config.integrity_interval.max(Duration::from_secs(1)),
            integrity_cancel.clone(),
        ));

        Ok(Self {
            state: AppState { ctx, store, control, sending },
            registration,
            integrity_cancel,
            integrity_handle: Mutex::new(Some(integrity_handle)),
        })
    }

    pub fn router(&self) -> Router {
        routes::router(self.state.clone())
    }

    pub fn status(&self) -> Option<NodeStatus> {
        self.registration.status()
    }

    /// Stop registration, unregister if the node was available, then drain
    /// the sending queue and stop the integrity loop.
    pub async fn shutdown(&self) {
        self.registration.shutdown().await;
        if self.registration.status() == Some(NodeStatus::Available) {
            match self.state.control.unregister_storage_node().await {
                Ok(_) => info!("Unregistered from control node"),
                Err(e) => warn!("Unregister failed: {}", e),
            }
        }
        self.state.sending.shutdown().await;

        self.integrity_cancel.cancel();
        let handle = self.integrity_handle.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        info!("Storage node stopped");
    }
}
