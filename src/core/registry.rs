use crate::core::bridge::{Bridge, BridgeSettings};
use crate::infrastructure::serial::DeviceOpener;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Keeps exactly one bridge per device path.
pub struct BridgeRegistry {
    settings: BridgeSettings,
    cancel: CancellationToken,
    bridges: HashMap<String, Arc<Bridge>>,
    tasks: Vec<JoinHandle<()>>,
}

impl BridgeRegistry {
    /// Bridges spawned from this registry stop when `cancel` fires.
    pub fn new(settings: BridgeSettings, cancel: CancellationToken) -> Self {
        Self {
            settings,
            cancel,
            bridges: HashMap::new(),
            tasks: Vec::new(),
        }
    }

    /// Return the bridge for `path`, spawning it with `open()` on first use.
    pub fn get_or_spawn<F>(&mut self, path: &str, open: F) -> Arc<Bridge>
    where
        F: FnOnce() -> Arc<dyn DeviceOpener>,
    {
        if let Some(bridge) = self.bridges.get(path) {
            return Arc::clone(bridge);
        }

        let (bridge, task) = Bridge::spawn(open(), self.settings, self.cancel.child_token());
        self.bridges.insert(path.to_string(), Arc::clone(&bridge));
        self.tasks.push(task);
        bridge
    }

    /// Cancel every bridge and wait for their supervisors to stop.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("Bridge supervisor task failed: {}", e);
            }
        }
        info!("All bridges stopped");
    }
}
