use crate::core::hub::{BroadcastHub, HubSettings, LinkStatus};
use crate::core::session::Session;
use crate::core::supervisor::{ReconnectSupervisor, SupervisorSettings, SupervisorState, SupervisorStats};
use crate::domain::config::GlobalConfig;
use crate::domain::error::BridgeResult;
use crate::infrastructure::serial::DeviceOpener;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Tunables for one bridge
#[derive(Debug, Clone, Copy, Default)]
pub struct BridgeSettings {
    pub hub: HubSettings,
    pub supervisor: SupervisorSettings,
}

impl From<&GlobalConfig> for BridgeSettings {
    fn from(global: &GlobalConfig) -> Self {
        Self {
            hub: HubSettings {
                subscriber_capacity: global.subscriber_capacity,
                transmit_capacity: global.transmit_capacity,
                overflow_policy: global.overflow_policy,
            },
            supervisor: SupervisorSettings {
                poll_interval: global.poll_interval(),
                retry_interval: global.retry_interval(),
                ..SupervisorSettings::default()
            },
        }
    }
}

/// One serial device shared by any number of network sessions.
///
/// Created once per device and alive until its cancellation token fires;
/// a cancelled bridge cannot be restarted.
pub struct Bridge {
    path: String,
    hub: Arc<BroadcastHub>,
    state: watch::Receiver<SupervisorState>,
    stats: Arc<SupervisorStats>,
    cancel: CancellationToken,
}

impl Bridge {
    /// Create the bridge and start its reconnect supervisor.
    pub fn spawn(
        opener: Arc<dyn DeviceOpener>,
        settings: BridgeSettings,
        cancel: CancellationToken,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let path = opener.path().to_string();
        let (hub, transmit) = BroadcastHub::new(settings.hub, cancel.clone());
        let hub = Arc::new(hub);

        let supervisor =
            ReconnectSupervisor::new(opener, Arc::clone(&hub), settings.supervisor, cancel.clone());
        let bridge = Arc::new(Self {
            path,
            hub,
            state: supervisor.watch_state(),
            stats: supervisor.stats(),
            cancel,
        });

        info!("Bridge for {} starting", bridge.path);
        let task = tokio::spawn(supervisor.run(transmit));
        (bridge, task)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Attach a new client session.
    pub async fn open_session(&self) -> BridgeResult<Session> {
        Session::open(Arc::clone(&self.hub)).await
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    pub fn status(&self) -> LinkStatus {
        self.hub.status()
    }

    pub fn watch_status(&self) -> watch::Receiver<LinkStatus> {
        self.hub.watch_status()
    }

    pub fn supervisor_state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    pub fn stats(&self) -> &SupervisorStats {
        &self.stats
    }

    /// Wait until the device is open. Returns false if the bridge shut down first.
    pub async fn wait_connected(&self) -> bool {
        let mut status = self.hub.watch_status();
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            seen = status.wait_for(LinkStatus::is_connected) => seen.is_ok(),
        }
    }

    pub fn shutdown(&self) {
        info!("Bridge for {} shutting down", self.path);
        self.cancel.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
