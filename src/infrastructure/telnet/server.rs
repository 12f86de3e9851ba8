use super::codec::{TelnetDecoder, TelnetEncoder, NEGOTIATION};
use crate::core::bridge::Bridge;
use crate::core::session::{pump_stream, SessionId};
use crate::domain::error::{BridgeError, BridgeResult};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
struct ClientConnection {
    addr: SocketAddr,
    session: SessionId,
    connected_at: Instant,
}

/// Telnet listener attached to one bridge
pub struct TelnetServer {
    listener: TcpListener,
    bind_addr: SocketAddr,
    bridge: Arc<Bridge>,
    clients: Arc<Mutex<Vec<ClientConnection>>>,
}

impl TelnetServer {
    pub async fn bind(bind_addr: &str, bridge: Arc<Bridge>) -> BridgeResult<Self> {
        let listener = TcpListener::bind(bind_addr).await.map_err(|e| {
            BridgeError::config(format!("Failed to bind to {}: {}", bind_addr, e))
        })?;
        let actual_addr = listener.local_addr()?;

        info!("Telnet listener for {} on {}", bridge.path(), actual_addr);

        Ok(Self {
            listener,
            bind_addr: actual_addr,
            bridge,
            clients: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    pub async fn client_count(&self) -> usize {
        self.clients.lock().await.len()
    }

    /// Accept connections until `shutdown` fires.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> BridgeResult<()> {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Telnet listener on {} stopping", self.bind_addr);
                    return Ok(());
                }
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            info!("New telnet client connected: {}", addr);
                            let server = Arc::clone(&self);
                            tokio::spawn(async move {
                                match server.handle_client(stream, addr).await {
                                    Ok(()) => {}
                                    Err(e) if e.is_session_local() => {
                                        debug!("Telnet client {} dropped: {}", addr, e)
                                    }
                                    Err(e) => warn!("Telnet client {} ended with error: {}", addr, e),
                                }
                                server.forget_client(addr).await;
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
            }
        }
    }

    async fn forget_client(&self, addr: SocketAddr) {
        let mut clients = self.clients.lock().await;
        match clients.iter().position(|c| c.addr == addr) {
            Some(index) => {
                let client = clients.remove(index);
                info!(
                    "Telnet client {} disconnected (session {}, {:?} connected)",
                    addr,
                    client.session,
                    client.connected_at.elapsed()
                );
            }
            None => info!("Telnet client disconnected: {}", addr),
        }
    }

    async fn handle_client(&self, mut stream: TcpStream, addr: SocketAddr) -> BridgeResult<()> {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not disable Nagle for {}: {}", addr, e);
        }

        let session = self.bridge.open_session().await?;
        self.clients.lock().await.push(ClientConnection {
            addr,
            session: session.id(),
            connected_at: Instant::now(),
        });

        stream.write_all(&NEGOTIATION).await?;
        stream.flush().await?;

        let (net_rx, net_tx) = stream.into_split();
        pump_stream(session, net_rx, net_tx, TelnetDecoder::new(), TelnetEncoder).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bridge::BridgeSettings;
    use crate::core::supervisor::SupervisorSettings;
    use crate::infrastructure::serial::MockDevice;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    async fn start(device: &MockDevice) -> (Arc<Bridge>, Arc<TelnetServer>, CancellationToken) {
        let cancel = CancellationToken::new();
        let settings = BridgeSettings {
            supervisor: SupervisorSettings {
                poll_interval: Duration::from_millis(10),
                retry_interval: Duration::from_millis(5),
                write_batch: 64,
            },
            ..BridgeSettings::default()
        };
        let (bridge, _task) = Bridge::spawn(Arc::new(device.clone()), settings, cancel.child_token());
        assert!(bridge.wait_connected().await);

        let server = Arc::new(TelnetServer::bind("127.0.0.1:0", Arc::clone(&bridge)).await.unwrap());
        tokio::spawn(Arc::clone(&server).run(cancel.clone()));
        (bridge, server, cancel)
    }

    async fn eventually<F: Fn() -> bool>(check: F) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_client_receives_negotiation_first() {
        let device = MockDevice::new("/dev/mock0");
        let (_bridge, server, cancel) = start(&device).await;

        let mut client = TcpStream::connect(server.local_addr()).await.unwrap();
        let mut preamble = [0u8; 6];
        client.read_exact(&mut preamble).await.unwrap();
        assert_eq!(preamble, [0xFF, 0xFB, 0x01, 0xFF, 0xFB, 0x03]);
        cancel.cancel();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_bytes_flow_both_ways() {
        let device = MockDevice::new("/dev/mock0");
        let (bridge, server, cancel) = start(&device).await;

        let mut client = TcpStream::connect(server.local_addr()).await.unwrap();
        let mut preamble = [0u8; 6];
        client.read_exact(&mut preamble).await.unwrap();

        // Client option replies must not reach the device.
        client.write_all(&[0xFF, 0xFD, 0x01, b'l', b's', b'\r', 0]).await.unwrap();
        let written = device.clone();
        eventually(move || written.written() == b"ls\r\n").await;

        tokio::time::timeout(Duration::from_secs(5), async {
            while bridge.hub().subscriber_count().await == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        device.preload(b"ok\n\xff");
        let mut reply = [0u8; 6];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"ok\r\n\xff\xff");
        assert_eq!(server.client_count().await, 1);
        cancel.cancel();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_disconnect_unregisters_session() {
        let device = MockDevice::new("/dev/mock0");
        let (bridge, server, cancel) = start(&device).await;

        let mut client = TcpStream::connect(server.local_addr()).await.unwrap();
        let mut preamble = [0u8; 6];
        client.read_exact(&mut preamble).await.unwrap();
        assert_eq!(bridge.hub().subscriber_count().await, 1);
        drop(client);

        tokio::time::timeout(Duration::from_secs(5), async {
            while server.client_count().await > 0 || bridge.hub().subscriber_count().await > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let device = MockDevice::new("/dev/mock0");
        let (bridge, _task) =
            Bridge::spawn(Arc::new(device), BridgeSettings::default(), CancellationToken::new());
        let result = TelnetServer::bind("256.0.0.1:0", Arc::clone(&bridge)).await;
        assert!(result.is_err());
        bridge.shutdown();
    }
}
