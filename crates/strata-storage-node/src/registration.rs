use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use strata_types::api::{PROTOCOL_VERSION, RegisterStorageNode};
use strata_types::models::NodeStatus;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::context::NodeContext;
use crate::control::{ControlError, ControlNode};
use crate::integrity;
use crate::storage::ChunkStore;

#[derive(Debug, Clone)]
pub struct RegistrationConfig {
    pub listen_port: u16,
    pub software: String,
    pub max_storage_mb: u64,
    /// Pause before the first attempt so the listener is up.
    pub initial_delay: Duration,
    pub retry_wait: Duration,
    pub heartbeat_interval: Duration,
}

impl RegistrationConfig {
    pub fn new(listen_port: u16, software: impl Into<String>, max_storage_mb: u64) -> Self {
        Self {
            listen_port,
            software: software.into(),
            max_storage_mb,
            initial_delay: Duration::from_secs(2),
            retry_wait: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(300),
        }
    }
}

/// Registers the node with the control node and keeps re-reporting it.
pub struct RegistrationUpdater {
    control: Arc<dyn ControlNode>,
    ctx: Arc<NodeContext>,
    store: Arc<ChunkStore>,
    config: RegistrationConfig,
    status: Arc<RwLock<Option<NodeStatus>>>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RegistrationUpdater {
    pub fn new(
        control: Arc<dyn ControlNode>,
        ctx: Arc<NodeContext>,
        store: Arc<ChunkStore>,
        config: RegistrationConfig,
    ) -> Self {
        Self {
            control,
            ctx,
            store,
            config,
            status: Arc::new(RwLock::new(None)),
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    /// Last status the control node reported, if registration has succeeded.
    pub fn status(&self) -> Option<NodeStatus> {
        *self.status.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn start(&self) {
        let task = run_registration_loop(
            self.control.clone(),
            self.ctx.clone(),
            self.store.clone(),
            self.config.clone(),
            self.status.clone(),
            self.cancel.clone(),
        );
        *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(tokio::spawn(task));
    }

    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Registration task ended abnormally: {}", e);
            }
        }
    }
}

async fn run_registration_loop(
    control: Arc<dyn ControlNode>,
    ctx: Arc<NodeContext>,
    store: Arc<ChunkStore>,
    config: RegistrationConfig,
    status: Arc<RwLock<Option<NodeStatus>>>,
    cancel: CancellationToken,
) {
    let mut wait = config.initial_delay;
    let mut recovery_sent = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        let available_mb = match store.available_mb() {
            Ok(mb) => mb,
            Err(e) => {
                warn!("Could not read free space: {}", e);
                0
            }
        };
        let req = RegisterStorageNode {
            port: config.listen_port,
            protocol_version: PROTOCOL_VERSION.to_string(),
            software: config.software.clone(),
            storage_mb: available_mb.min(config.max_storage_mb),
        };

        match control.register_storage_node(req).await {
            Ok(reg) => {
                if let Some(control_time) = reg.control_time {
                    ctx.set_control_time(control_time);
                }
                let previous = status.write().unwrap_or_else(PoisonError::into_inner).replace(reg.status);
                if previous != Some(reg.status) {
                    info!("Registered with control node, status: {}", reg.status);
                }

                if reg.status == NodeStatus::RecoveryRequired && !recovery_sent {
                    recovery_sent = send_recovery(control.as_ref(), store.clone()).await;
                } else if reg.status != NodeStatus::RecoveryRequired {
                    recovery_sent = false;
                }
                wait = config.heartbeat_interval;
            }
            Err(ControlError::Authentication) => {
                error!("Control node rejected registration credentials; giving up");
                break;
            }
            Err(e) => {
                error!(
                    "Registration failed - trying again in {} seconds: {}",
                    config.retry_wait.as_secs(),
                    e
                );
                wait = config.retry_wait;
            }
        }
    }
}

async fn send_recovery(control: &dyn ControlNode, store: Arc<ChunkStore>) -> bool {
    info!("Control node requested recovery data; collecting chunk hashes");
    let data = match tokio::task::spawn_blocking(move || integrity::collect_recovery_info(&store)).await {
        Ok(Ok(data)) => data,
        Ok(Err(e)) => {
            error!("Collecting recovery info failed: {}", e);
            return false;
        }
        Err(e) => {
            error!("Recovery collection task failed: {}", e);
            return false;
        }
    };
    match control.send_recovery_data(integrity::recovery_request(&data)).await {
        Ok(_) => {
            info!("Recovery data sent ({} bytes compressed)", data.len());
            true
        }
        Err(e) => {
            error!("Sending recovery data failed: {}", e);
            false
        }
    }
}
