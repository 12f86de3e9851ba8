//! Broadcast hub: fan-out of device bytes to every session and the shared
//! transmit queue feeding the device.
//!
//! The subscriber registry is the only lock-protected state of a bridge. It is
//! held for the whole of one fan-out so a subscriber added or removed
//! concurrently either sees a delivered batch completely or not at all.

use crate::domain::config::OverflowPolicy;
use crate::domain::error::{BridgeError, BridgeResult};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Message reported to typing users before the device was ever opened.
pub const NOT_CONNECTED_MESSAGE: &str = "Serial is not connected";

/// Device link status as seen by sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStatus {
    /// No device handle has been opened yet.
    Connecting,
    Connected,
    /// The device was lost; carries the last error message.
    Disconnected(String),
}

impl LinkStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, LinkStatus::Connected)
    }

    /// Line substituted for a transmitted line terminator while not connected.
    pub fn error_line(&self) -> Option<String> {
        match self {
            LinkStatus::Connected => None,
            LinkStatus::Connecting => Some(format!("Error: {}\n", NOT_CONNECTED_MESSAGE)),
            LinkStatus::Disconnected(err) => Some(format!("Error: {}\n", err)),
        }
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkStatus::Connecting => write!(f, "Connecting"),
            LinkStatus::Connected => write!(f, "Connected"),
            LinkStatus::Disconnected(err) => write!(f, "Disconnected: {}", err),
        }
    }
}

/// Unique identifier for a subscriber queue
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct SubscriberId(pub u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Receive side of one session's bounded byte queue.
#[derive(Debug)]
pub struct Subscriber {
    id: SubscriberId,
    rx: mpsc::Receiver<u8>,
    cancel: CancellationToken,
}

impl Subscriber {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next device byte. Cancel safe.
    pub async fn recv(&mut self) -> BridgeResult<u8> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(BridgeError::Cancelled),
            byte = self.rx.recv() => byte.ok_or(BridgeError::SessionClosed),
        }
    }

    pub fn try_recv(&mut self) -> Option<u8> {
        self.rx.try_recv().ok()
    }
}

struct SubscriberSlot {
    id: SubscriberId,
    tx: mpsc::Sender<u8>,
    dropped: u64,
}

/// Receive side of the shared transmit queue, consumed by the write pump.
#[derive(Debug)]
pub struct TransmitQueue {
    rx: mpsc::Receiver<u8>,
}

impl TransmitQueue {
    /// Wait for at least one byte, then take whatever else is already queued.
    pub async fn recv_batch(&mut self, max: usize) -> Option<Vec<u8>> {
        let first = self.rx.recv().await?;
        let mut batch = Vec::with_capacity(max.clamp(1, 256));
        batch.push(first);
        while batch.len() < max {
            match self.rx.try_recv() {
                Ok(byte) => batch.push(byte),
                Err(_) => break,
            }
        }
        Some(batch)
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Sizing and overflow behaviour of the hub's queues.
#[derive(Debug, Clone, Copy)]
pub struct HubSettings {
    pub subscriber_capacity: usize,
    pub transmit_capacity: usize,
    pub overflow_policy: OverflowPolicy,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            subscriber_capacity: 4096,
            transmit_capacity: 4096,
            overflow_policy: OverflowPolicy::Block,
        }
    }
}

/// Registry of subscriber queues plus the shared transmit queue.
pub struct BroadcastHub {
    subscribers: Mutex<Vec<SubscriberSlot>>,
    next_id: AtomicU64,
    settings: HubSettings,
    transmit: mpsc::Sender<u8>,
    status: watch::Sender<LinkStatus>,
    cancel: CancellationToken,
}

impl BroadcastHub {
    /// Create a hub and the transmit queue receiver for the write pump.
    pub fn new(settings: HubSettings, cancel: CancellationToken) -> (Self, TransmitQueue) {
        let settings = HubSettings {
            subscriber_capacity: settings.subscriber_capacity.max(1),
            transmit_capacity: settings.transmit_capacity.max(1),
            ..settings
        };
        let (transmit, rx) = mpsc::channel(settings.transmit_capacity);
        let (status, _) = watch::channel(LinkStatus::Connecting);

        let hub = Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            settings,
            transmit,
            status,
            cancel,
        };
        (hub, TransmitQueue { rx })
    }

    pub fn settings(&self) -> HubSettings {
        self.settings
    }

    /// Register a new subscriber queue.
    pub async fn subscribe(&self) -> BridgeResult<Subscriber> {
        if self.cancel.is_cancelled() {
            return Err(BridgeError::Cancelled);
        }

        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = mpsc::channel(self.settings.subscriber_capacity);

        let mut subscribers = self.subscribers.lock().await;
        subscribers.push(SubscriberSlot { id, tx, dropped: 0 });
        info!("Subscriber {} registered ({} active)", id, subscribers.len());

        Ok(Subscriber {
            id,
            rx,
            cancel: self.cancel.clone(),
        })
    }

    /// Remove a subscriber. A subscriber already pruned by the fan-out is a no-op.
    pub async fn unsubscribe(&self, subscriber: Subscriber) -> bool {
        let id = subscriber.id;
        // Closing the queue first releases a fan-out blocked on it.
        drop(subscriber);

        let mut subscribers = self.subscribers.lock().await;
        let before = subscribers.len();
        subscribers.retain(|slot| slot.id != id);
        let removed = subscribers.len() != before;
        if removed {
            info!("Subscriber {} unregistered ({} active)", id, subscribers.len());
        }
        removed
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }

    /// Bytes dropped so far for a subscriber: overflow under
    /// `OverflowPolicy::DropNewest` plus skipped status lines.
    pub async fn dropped_for(&self, id: SubscriberId) -> Option<u64> {
        let subscribers = self.subscribers.lock().await;
        subscribers.iter().find(|s| s.id == id).map(|s| s.dropped)
    }

    /// Copy a batch of device bytes into every registered subscriber queue.
    pub async fn deliver(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }

        let mut subscribers = self.subscribers.lock().await;
        let mut stale = Vec::new();

        for slot in subscribers.iter_mut() {
            let open = match self.settings.overflow_policy {
                OverflowPolicy::Block => {
                    match Self::deliver_blocking(slot, bytes, self.settings.subscriber_capacity, &self.cancel)
                        .await
                    {
                        Some(open) => open,
                        None => return,
                    }
                }
                OverflowPolicy::DropNewest => Self::deliver_lossy(slot, bytes),
            };
            if !open {
                stale.push(slot.id);
            }
        }

        if !stale.is_empty() {
            subscribers.retain(|slot| !stale.contains(&slot.id));
            debug!("Pruned {} stale subscriber(s)", stale.len());
        }
    }

    /// Returns `None` when the bridge was cancelled mid-delivery,
    /// otherwise whether the queue is still open.
    async fn deliver_blocking(
        slot: &mut SubscriberSlot,
        bytes: &[u8],
        capacity: usize,
        cancel: &CancellationToken,
    ) -> Option<bool> {
        for chunk in bytes.chunks(capacity) {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                permits = slot.tx.reserve_many(chunk.len()) => match permits {
                    Ok(permits) => {
                        for (permit, &byte) in permits.zip(chunk) {
                            permit.send(byte);
                        }
                    }
                    Err(_) => return Some(false),
                },
            }
        }
        Some(true)
    }

    fn deliver_lossy(slot: &mut SubscriberSlot, bytes: &[u8]) -> bool {
        let mut dropped = 0u64;
        for &byte in bytes {
            match slot.tx.try_send(byte) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => dropped += 1,
                Err(TrySendError::Closed(_)) => return false,
            }
        }
        if dropped > 0 {
            slot.dropped += dropped;
            warn!("Subscriber {} queue full, dropped {} byte(s)", slot.id, dropped);
        }
        true
    }

    /// Append session bytes to the shared transmit queue.
    ///
    /// The bytes of one call are enqueued contiguously. While the device is
    /// absent nothing blocks: each line terminator produces an error line for
    /// the current sessions and bytes that do not fit are dropped.
    pub async fn enqueue_transmit(&self, bytes: &[u8]) -> BridgeResult<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        if self.cancel.is_cancelled() {
            return Err(BridgeError::Cancelled);
        }

        let status = self.status();
        if let Some(line) = status.error_line() {
            self.enqueue_offline(bytes)?;
            let terminators = bytes.iter().filter(|&&b| b == b'\n').count();
            for _ in 0..terminators {
                self.announce(line.as_bytes()).await;
            }
            return Ok(());
        }

        for chunk in bytes.chunks(self.settings.transmit_capacity) {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(BridgeError::Cancelled),
                permits = self.transmit.reserve_many(chunk.len()) => {
                    let permits = permits.map_err(|_| BridgeError::Cancelled)?;
                    for (permit, &byte) in permits.zip(chunk) {
                        permit.send(byte);
                    }
                }
            }
        }
        debug!("Queued {} byte(s) for transmit: {}", bytes.len(), hex::encode(bytes));
        Ok(())
    }

    /// Hand a whole status line to every current subscriber without waiting.
    /// A subscriber whose queue cannot take the full line misses it.
    async fn announce(&self, line: &[u8]) {
        let mut subscribers = self.subscribers.lock().await;
        let mut stale = Vec::new();

        for slot in subscribers.iter_mut() {
            if slot.tx.is_closed() {
                stale.push(slot.id);
                continue;
            }
            // only the hub sends, and it holds the lock, so capacity can only grow
            if slot.tx.capacity() < line.len() {
                slot.dropped += line.len() as u64;
                debug!("Subscriber {} queue full, skipped status line", slot.id);
                continue;
            }
            for &byte in line {
                if slot.tx.try_send(byte).is_err() {
                    break;
                }
            }
        }

        if !stale.is_empty() {
            subscribers.retain(|slot| !stale.contains(&slot.id));
        }
    }

    fn enqueue_offline(&self, bytes: &[u8]) -> BridgeResult<()> {
        let mut dropped = 0usize;
        for &byte in bytes {
            match self.transmit.try_send(byte) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => dropped += 1,
                Err(TrySendError::Closed(_)) => return Err(BridgeError::Cancelled),
            }
        }
        if dropped > 0 {
            warn!("Transmit queue full while disconnected, dropped {} byte(s)", dropped);
        }
        Ok(())
    }

    pub fn status(&self) -> LinkStatus {
        self.status.borrow().clone()
    }

    pub fn set_status(&self, status: LinkStatus) {
        self.status.send_replace(status);
    }

    pub fn watch_status(&self) -> watch::Receiver<LinkStatus> {
        self.status.subscribe()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}
