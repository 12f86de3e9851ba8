//! Generic byte-stream session over a bridge.
//!
//! Every adapter (Telnet, web terminal, stdio) is a `Session` underneath: one
//! subscriber queue read through the receive-side discipline, and writes fed
//! through the transmit-side discipline into the shared transmit queue.

use crate::core::discipline::{RxDiscipline, TxDiscipline};
use crate::core::hub::{BroadcastHub, Subscriber};
use crate::domain::error::{BridgeError, BridgeResult};
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};
use uuid::Uuid;

const COPY_BUFFER_SIZE: usize = 1024;

/// Unique identifier for a network session
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Minimal contract shared by every session adapter.
#[async_trait]
pub trait ByteStream: Send {
    /// Wait for device output; returns at least one byte.
    async fn read(&mut self, buf: &mut [u8]) -> BridgeResult<usize>;

    /// Send client input towards the device.
    async fn write(&mut self, data: &[u8]) -> BridgeResult<usize>;

    async fn close(&mut self) -> BridgeResult<()>;
}

/// Capability of sessions fronting a terminal emulator with a size.
pub trait TerminalGeometry {
    fn resize(&mut self, columns: u16, rows: u16) -> BridgeResult<()>;
}

/// Capability of sessions that advertise window-title metadata.
pub trait WindowTitle {
    /// Variables available to the title template; always contains `command`.
    fn title_variables(&self) -> BTreeMap<String, serde_json::Value>;
}

/// Device-output half of a session.
pub struct SessionReader {
    id: SessionId,
    hub: Arc<BroadcastHub>,
    subscriber: Option<Subscriber>,
    discipline: RxDiscipline,
    pending: VecDeque<u8>,
}

impl SessionReader {
    /// Wait for at least one byte, then take what is already queued. Cancel safe.
    pub async fn read(&mut self, buf: &mut [u8]) -> BridgeResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let subscriber = self.subscriber.as_mut().ok_or(BridgeError::SessionClosed)?;

        let mut out = Vec::with_capacity(2);
        if self.pending.is_empty() {
            let byte = subscriber.recv().await?;
            self.discipline.push(byte, &mut out);
            self.pending.extend(out.drain(..));
        }
        while self.pending.len() < buf.len() {
            match subscriber.try_recv() {
                Some(byte) => {
                    self.discipline.push(byte, &mut out);
                    self.pending.extend(out.drain(..));
                }
                None => break,
            }
        }

        let n = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    /// Unregister the subscriber queue. Idempotent.
    pub async fn close(&mut self) {
        if let Some(subscriber) = self.subscriber.take() {
            self.hub.unsubscribe(subscriber).await;
            debug!("Session {} receive queue closed", self.id);
        }
    }
}

/// Client-input half of a session.
pub struct SessionWriter {
    id: SessionId,
    hub: Arc<BroadcastHub>,
    discipline: TxDiscipline,
    closed: bool,
}

impl SessionWriter {
    pub async fn write(&mut self, data: &[u8]) -> BridgeResult<usize> {
        if self.closed {
            return Err(BridgeError::SessionClosed);
        }
        let out = self.discipline.apply(data);
        self.hub.enqueue_transmit(&out).await?;
        Ok(data.len())
    }

    pub fn id(&self) -> SessionId {
        self.id
    }
}

/// One client attached to a bridge.
pub struct Session {
    id: SessionId,
    reader: SessionReader,
    writer: SessionWriter,
}

impl Session {
    /// Register a subscriber with the hub and wrap it in a session.
    pub async fn open(hub: Arc<BroadcastHub>) -> BridgeResult<Self> {
        let id = SessionId::new();
        let subscriber = hub.subscribe().await?;
        info!("Session {} opened as {}", id, subscriber.id());

        Ok(Self {
            id,
            reader: SessionReader {
                id,
                hub: Arc::clone(&hub),
                subscriber: Some(subscriber),
                discipline: RxDiscipline::new(),
                pending: VecDeque::new(),
            },
            writer: SessionWriter {
                id,
                hub,
                discipline: TxDiscipline::new(),
                closed: false,
            },
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Split into halves that can be driven concurrently.
    pub fn into_split(self) -> (SessionReader, SessionWriter) {
        (self.reader, self.writer)
    }

    /// Borrow both halves at once.
    pub fn halves(&mut self) -> (&mut SessionReader, &mut SessionWriter) {
        (&mut self.reader, &mut self.writer)
    }
}

#[async_trait]
impl ByteStream for Session {
    async fn read(&mut self, buf: &mut [u8]) -> BridgeResult<usize> {
        self.reader.read(buf).await
    }

    async fn write(&mut self, data: &[u8]) -> BridgeResult<usize> {
        self.writer.write(data).await
    }

    async fn close(&mut self) -> BridgeResult<()> {
        self.writer.closed = true;
        self.reader.close().await;
        info!("Session {} closed", self.id);
        Ok(())
    }
}

/// Protocol framing between a session and its network stream.
pub trait ByteFilter: Send {
    fn filter(&mut self, input: &[u8], out: &mut Vec<u8>);
}

/// Framing for streams that carry session bytes unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl ByteFilter for Passthrough {
    fn filter(&mut self, input: &[u8], out: &mut Vec<u8>) {
        out.extend_from_slice(input);
    }
}

/// Copy bytes both ways between a session and a network stream until either
/// side fails, then unregister the session.
///
/// `inbound` frames client bytes before the transmit-side discipline and
/// `outbound` frames device bytes after the receive-side discipline.
pub async fn pump_stream<R, W, I, O>(
    session: Session,
    mut net_rx: R,
    mut net_tx: W,
    mut inbound: I,
    mut outbound: O,
) -> BridgeResult<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
    I: ByteFilter,
    O: ByteFilter,
{
    let id = session.id();
    let (mut reader, mut writer) = session.into_split();

    let result = tokio::select! {
        r = copy_downstream(&mut reader, &mut net_tx, &mut outbound) => r,
        r = copy_upstream(&mut net_rx, &mut writer, &mut inbound) => r,
    };

    reader.close().await;
    match result {
        Err(BridgeError::SessionClosed) => {
            info!("Session {} ended by peer", id);
            Ok(())
        }
        Err(e) => {
            info!("Session {} ended: {}", id, e);
            Err(e)
        }
        Ok(()) => Ok(()),
    }
}

async fn copy_downstream<W, O>(
    reader: &mut SessionReader,
    net_tx: &mut W,
    outbound: &mut O,
) -> BridgeResult<()>
where
    W: AsyncWrite + Unpin + Send,
    O: ByteFilter,
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut framed = Vec::with_capacity(COPY_BUFFER_SIZE);
    loop {
        let n = reader.read(&mut buf).await?;
        framed.clear();
        outbound.filter(&buf[..n], &mut framed);
        net_tx.write_all(&framed).await?;
        net_tx.flush().await?;
    }
}

async fn copy_upstream<R, I>(
    net_rx: &mut R,
    writer: &mut SessionWriter,
    inbound: &mut I,
) -> BridgeResult<()>
where
    R: AsyncRead + Unpin + Send,
    I: ByteFilter,
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut framed = Vec::with_capacity(COPY_BUFFER_SIZE);
    loop {
        let n = net_rx.read(&mut buf).await?;
        if n == 0 {
            return Err(BridgeError::SessionClosed);
        }
        framed.clear();
        inbound.filter(&buf[..n], &mut framed);
        writer.write(&framed).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hub::{HubSettings, LinkStatus, TransmitQueue};
    use tokio_util::sync::CancellationToken;

    fn connected_hub() -> (Arc<BroadcastHub>, TransmitQueue) {
        let (hub, queue) = BroadcastHub::new(HubSettings::default(), CancellationToken::new());
        hub.set_status(LinkStatus::Connected);
        (Arc::new(hub), queue)
    }

    #[tokio::test]
    async fn test_read_applies_receive_discipline() {
        let (hub, _queue) = connected_hub();
        let mut session = Session::open(Arc::clone(&hub)).await.unwrap();

        hub.deliver(b"a\nb").await;
        let mut buf = [0u8; 16];
        let n = session.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"a\r\nb");
    }

    #[tokio::test]
    async fn test_read_keeps_overflow_for_next_call() {
        let (hub, _queue) = connected_hub();
        let mut session = Session::open(Arc::clone(&hub)).await.unwrap();

        hub.deliver(b"x\n").await;
        let mut buf = [0u8; 2];
        let n = session.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"x\r");
        let n = session.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"\n");
    }

    #[tokio::test]
    async fn test_write_applies_transmit_discipline() {
        let (hub, mut queue) = connected_hub();
        let mut session = Session::open(hub).await.unwrap();

        assert_eq!(session.write(b"a\rb\x7f").await.unwrap(), 4);
        assert_eq!(queue.recv_batch(64).await.unwrap(), b"a\r\nb\x08");
    }

    #[tokio::test]
    async fn test_close_unregisters_and_rejects_io() {
        let (hub, _queue) = connected_hub();
        let mut session = Session::open(Arc::clone(&hub)).await.unwrap();
        assert_eq!(hub.subscriber_count().await, 1);

        session.close().await.unwrap();
        session.close().await.unwrap();
        assert_eq!(hub.subscriber_count().await, 0);

        let mut buf = [0u8; 4];
        assert!(matches!(session.read(&mut buf).await, Err(BridgeError::SessionClosed)));
        assert!(matches!(session.write(b"x").await, Err(BridgeError::SessionClosed)));
    }

    #[tokio::test]
    async fn test_sessions_keep_independent_line_state() {
        let (hub, mut queue) = connected_hub();
        let mut first = Session::open(Arc::clone(&hub)).await.unwrap();
        let mut second = Session::open(Arc::clone(&hub)).await.unwrap();

        first.write(b"one\r").await.unwrap();
        second.write(b"\n").await.unwrap();
        assert_eq!(queue.recv_batch(64).await.unwrap(), b"one\r\n\n");
    }

    #[tokio::test]
    async fn test_pump_stream_copies_both_ways() {
        let (hub, mut queue) = connected_hub();
        let session = Session::open(Arc::clone(&hub)).await.unwrap();

        let (client, server) = tokio::io::duplex(256);
        let (server_rx, server_tx) = tokio::io::split(server);
        let pump = tokio::spawn(pump_stream(
            session,
            server_rx,
            server_tx,
            Passthrough,
            Passthrough,
        ));

        let (mut client_rx, mut client_tx) = tokio::io::split(client);
        client_tx.write_all(b"help\r").await.unwrap();
        assert_eq!(queue.recv_batch(64).await.unwrap(), b"help\r\n");

        hub.deliver(b"usage\n").await;
        let mut buf = [0u8; 7];
        client_rx.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"usage\r\n");

        drop(client_tx);
        drop(client_rx);
        pump.await.unwrap().unwrap();
        assert_eq!(hub.subscriber_count().await, 0);
    }
}
