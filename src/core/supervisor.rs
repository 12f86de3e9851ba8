//! Reconnect supervisor: owns the device handle lifecycle.
//!
//! `Opening -> Serving -> Lost -> Opening`, until the bridge is cancelled.
//! While serving, a blocking read pump feeds the hub and the bridge-global
//! write pump drains the transmit queue into a cloned handle. The transmit
//! queue outlives every cycle, so bytes queued during an outage are flushed
//! after the device returns.

use crate::core::hub::{BroadcastHub, LinkStatus, TransmitQueue};
use crate::infrastructure::serial::device::{is_transient, open_with_retry, DeviceOpener, DevicePort};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const READ_BUFFER_SIZE: usize = 1024;

/// Supervisor states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Opening,
    Serving,
    Lost,
    Stopped,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorState::Opening => write!(f, "Opening"),
            SupervisorState::Serving => write!(f, "Serving"),
            SupervisorState::Lost => write!(f, "Lost"),
            SupervisorState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Timing knobs, injectable so tests do not wait on real-world intervals.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorSettings {
    pub poll_interval: Duration,
    pub retry_interval: Duration,
    pub write_batch: usize,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            retry_interval: Duration::from_secs(1),
            write_batch: 256,
        }
    }
}

/// Counters observable while the supervisor runs.
#[derive(Debug, Default)]
pub struct SupervisorStats {
    serving_cycles: AtomicU64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
}

impl SupervisorStats {
    /// Number of times the supervisor entered `Serving`.
    pub fn serving_cycles(&self) -> u64 {
        self.serving_cycles.load(Ordering::SeqCst)
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }
}

/// Write handle for one serving cycle.
struct PortLease {
    port: Box<dyn DevicePort>,
    lost: CancellationToken,
}

pub struct ReconnectSupervisor {
    opener: Arc<dyn DeviceOpener>,
    hub: Arc<BroadcastHub>,
    settings: SupervisorSettings,
    cancel: CancellationToken,
    state: watch::Sender<SupervisorState>,
    stats: Arc<SupervisorStats>,
}

impl ReconnectSupervisor {
    pub fn new(
        opener: Arc<dyn DeviceOpener>,
        hub: Arc<BroadcastHub>,
        settings: SupervisorSettings,
        cancel: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(SupervisorState::Opening);
        Self {
            opener,
            hub,
            settings,
            cancel,
            state,
            stats: Arc::new(SupervisorStats::default()),
        }
    }

    pub fn watch_state(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> Arc<SupervisorStats> {
        Arc::clone(&self.stats)
    }

    fn enter(&self, state: SupervisorState) {
        debug!("{}: entering {}", self.opener.path(), state);
        self.state.send_replace(state);
    }

    /// Run the state machine until the bridge is cancelled.
    pub async fn run(self, transmit: TransmitQueue) {
        let (lease_tx, lease_rx) = mpsc::channel(1);
        let writer = tokio::spawn(write_pump(
            transmit,
            lease_rx,
            Arc::clone(&self.hub),
            Arc::clone(&self.stats),
            self.cancel.clone(),
            self.settings.write_batch.max(1),
        ));

        loop {
            self.enter(SupervisorState::Opening);
            let port = match open_with_retry(
                Arc::clone(&self.opener),
                self.settings.retry_interval,
                &self.cancel,
            )
            .await
            {
                Some(port) => port,
                None => break,
            };

            let lost = self.cancel.child_token();
            let opened_at = Instant::now();
            self.serve(port, &lease_tx, &lost).await;

            if self.cancel.is_cancelled() {
                break;
            }
            self.enter(SupervisorState::Lost);
            if self.hub.status().is_connected() {
                self.hub
                    .set_status(LinkStatus::Disconnected("device lost".to_string()));
            }
            warn!("{}: device lost ({}), reconnecting", self.opener.path(), self.hub.status());

            // pace reopening when the handle failed right after it was opened
            if opened_at.elapsed() < self.settings.poll_interval {
                debug!(
                    "{}: lost within {:?} of opening, waiting {:?}",
                    self.opener.path(),
                    self.settings.poll_interval,
                    self.settings.retry_interval
                );
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.settings.retry_interval) => {}
                }
            }
        }

        if let Err(e) = writer.await {
            error!("{}: write pump ended abnormally: {}", self.opener.path(), e);
        }
        self.enter(SupervisorState::Stopped);
        info!("{}: supervisor stopped", self.opener.path());
    }

    /// One `Serving` cycle. Returns once the handle is closed.
    async fn serve(
        &self,
        port: Box<dyn DevicePort>,
        lease_tx: &mpsc::Sender<PortLease>,
        lost: &CancellationToken,
    ) {
        let writer_port = match port.try_clone_port() {
            Ok(writer_port) => writer_port,
            Err(e) => {
                mark_lost(&self.hub, lost, &e.to_string());
                return;
            }
        };
        if lease_tx
            .send(PortLease {
                port: writer_port,
                lost: lost.clone(),
            })
            .await
            .is_err()
        {
            lost.cancel();
            return;
        }

        self.hub.set_status(LinkStatus::Connected);
        self.stats.serving_cycles.fetch_add(1, Ordering::SeqCst);
        self.enter(SupervisorState::Serving);
        info!("{}: serving", self.opener.path());

        let reader = {
            let hub = Arc::clone(&self.hub);
            let stats = Arc::clone(&self.stats);
            let lost = lost.clone();
            let runtime = Handle::current();
            tokio::task::spawn_blocking(move || read_pump(port, hub, stats, lost, runtime))
        };

        loop {
            tokio::select! {
                _ = lost.cancelled() => break,
                _ = tokio::time::sleep(self.settings.poll_interval) => {
                    if !self.opener.is_present() {
                        let message = format!("{}: no such device", self.opener.path());
                        mark_lost(&self.hub, lost, &message);
                        break;
                    }
                }
            }
        }

        lost.cancel();
        // the read pump drops the handle on exit, so no reopen can overlap it
        if let Err(e) = reader.await {
            error!("{}: read pump ended abnormally: {}", self.opener.path(), e);
        }
    }
}

/// Record a fatal device error once per cycle and end the cycle.
fn mark_lost(hub: &BroadcastHub, lost: &CancellationToken, message: &str) {
    if lost.is_cancelled() {
        return;
    }
    error!("Device error: {}", message);
    hub.set_status(LinkStatus::Disconnected(message.to_string()));
    lost.cancel();
}

fn read_pump(
    mut port: Box<dyn DevicePort>,
    hub: Arc<BroadcastHub>,
    stats: Arc<SupervisorStats>,
    lost: CancellationToken,
    runtime: Handle,
) {
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];

    while !lost.is_cancelled() {
        match port.read_bytes(&mut buffer) {
            Ok(0) => std::thread::sleep(Duration::from_millis(10)),
            Ok(n) => {
                debug!("Read {} byte(s) from device: {}", n, hex::encode(&buffer[..n]));
                stats.bytes_read.fetch_add(n as u64, Ordering::Relaxed);
                runtime.block_on(hub.deliver(&buffer[..n]));
            }
            Err(e) if is_transient(&e) => continue,
            Err(e) => {
                mark_lost(&hub, &lost, &e.to_string());
                break;
            }
        }
    }
    debug!("Read pump finished");
}

async fn write_pump(
    mut transmit: TransmitQueue,
    mut leases: mpsc::Receiver<PortLease>,
    hub: Arc<BroadcastHub>,
    stats: Arc<SupervisorStats>,
    cancel: CancellationToken,
    batch_size: usize,
) {
    loop {
        let lease = tokio::select! {
            _ = cancel.cancelled() => return,
            lease = leases.recv() => match lease {
                Some(lease) => lease,
                None => return,
            },
        };
        let PortLease { mut port, lost } = lease;
        debug!("Write pump attached ({} byte(s) pending)", transmit.len());

        loop {
            let batch = tokio::select! {
                biased;
                _ = lost.cancelled() => break,
                batch = transmit.recv_batch(batch_size) => match batch {
                    Some(batch) => batch,
                    None => return,
                },
            };

            let attempt_lost = lost.clone();
            let written = tokio::task::spawn_blocking(move || {
                let result = loop {
                    match port.write_all_bytes(&batch) {
                        Err(e) if is_transient(&e) && !attempt_lost.is_cancelled() => continue,
                        other => break other,
                    }
                };
                (port, batch, result)
            })
            .await;

            match written {
                Ok((returned, batch, Ok(()))) => {
                    port = returned;
                    debug!("Wrote {} byte(s) to device: {}", batch.len(), hex::encode(&batch));
                    stats.bytes_written.fetch_add(batch.len() as u64, Ordering::Relaxed);
                }
                Ok((_, batch, Err(e))) => {
                    warn!("Dropped {} in-flight byte(s) after write failure", batch.len());
                    mark_lost(&hub, &lost, &e.to_string());
                    break;
                }
                Err(e) => {
                    mark_lost(&hub, &lost, &e.to_string());
                    break;
                }
            }
        }
    }
}
