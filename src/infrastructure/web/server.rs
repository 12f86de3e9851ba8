use super::protocol::{
    basic_auth_matches, output_frame, pong_frame, preferences_frame, reconnect_frame, render_title,
    title_frame, ClientMessage, TerminalPreferences, DEFAULT_RECONNECT_SECS, DEFAULT_TITLE,
};
use super::session::{TitleInfo, WebInput, WebTerminalSession};
use crate::core::bridge::Bridge;
use crate::core::session::{ByteStream, SessionReader, TerminalGeometry, WindowTitle};
use crate::domain::error::{BridgeError, BridgeResult};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const OUTPUT_BUFFER_SIZE: usize = 1024;
const REPLY_QUEUE_SIZE: usize = 16;

/// Options for the web-terminal listener.
#[derive(Debug, Clone)]
pub struct WebOptions {
    /// `user:password` required through HTTP Basic auth when set
    pub credential: Option<String>,
    /// Window title template with `{variable}` placeholders
    pub title: String,
    pub title_info: TitleInfo,
    pub preferences: TerminalPreferences,
    /// Client reconnect delay in seconds; `None` disables reconnecting
    pub reconnect: Option<u64>,
}

impl Default for WebOptions {
    fn default() -> Self {
        Self {
            credential: None,
            title: DEFAULT_TITLE.to_string(),
            title_info: TitleInfo::from_env(),
            preferences: TerminalPreferences::default(),
            reconnect: Some(DEFAULT_RECONNECT_SECS),
        }
    }
}

struct WebState {
    bridge: Arc<Bridge>,
    options: WebOptions,
}

/// Web-terminal listener attached to one bridge
pub struct WebServer {
    listener: TcpListener,
    bind_addr: SocketAddr,
    state: Arc<WebState>,
}

impl WebServer {
    pub async fn bind(bind_addr: &str, bridge: Arc<Bridge>, options: WebOptions) -> BridgeResult<Self> {
        let listener = TcpListener::bind(bind_addr).await.map_err(|e| {
            BridgeError::config(format!("Failed to bind to {}: {}", bind_addr, e))
        })?;
        let actual_addr = listener.local_addr()?;

        info!("Web terminal for {} on http://{}/ws", bridge.path(), actual_addr);

        Ok(Self {
            listener,
            bind_addr: actual_addr,
            state: Arc::new(WebState { bridge, options }),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .with_state(Arc::clone(&self.state))
    }

    /// Serve until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) -> BridgeResult<()> {
        let app = self.router();
        axum::serve(self.listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;
        info!("Web terminal on {} stopped", self.bind_addr);
        Ok(())
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<Arc<WebState>>,
) -> Response {
    if let Some(credential) = &state.options.credential {
        let authorization = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok());
        if !basic_auth_matches(authorization, credential) {
            warn!("Rejected web terminal client: bad credentials");
            return (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, "Basic realm=\"serbridge\"")],
            )
                .into_response();
        }
    }

    ws.on_upgrade(move |socket| async move {
        match handle_socket(socket, state).await {
            Ok(()) => {}
            Err(e) if e.is_session_local() => debug!("Web terminal client dropped: {}", e),
            Err(e) => warn!("Web terminal client ended with error: {}", e),
        }
    })
}

async fn handle_socket(socket: WebSocket, state: Arc<WebState>) -> BridgeResult<()> {
    let (mut sender, mut receiver) = socket.split();

    // The client opens with its auth/arguments frame; nothing in it is used.
    match receiver.next().await {
        Some(Ok(Message::Close(_))) | None => return Ok(()),
        Some(Err(e)) => return Err(BridgeError::Protocol(e.to_string())),
        Some(Ok(_)) => {}
    }

    let session = state.bridge.open_session().await?;
    let mut web = WebTerminalSession::new(
        session,
        state.bridge.path(),
        state.options.title_info.clone(),
    );
    info!("Web terminal session {} connected", web.id());

    let result = match send_setup(&web, &mut sender, &state.options).await {
        Ok(()) => serve_session(&mut web, &mut sender, &mut receiver).await,
        Err(e) => Err(e),
    };

    web.close().await?;
    match result {
        Err(BridgeError::SessionClosed) => Ok(()),
        other => other,
    }
}

/// Title, preferences and reconnect delay, in the order clients expect them.
async fn send_setup(
    web: &WebTerminalSession,
    sender: &mut SplitSink<WebSocket, Message>,
    options: &WebOptions,
) -> BridgeResult<()> {
    let title = render_title(&options.title, &web.title_variables());
    send_text(sender, title_frame(&title)).await?;
    send_text(sender, preferences_frame(&options.preferences)?).await?;
    if let Some(seconds) = options.reconnect {
        send_text(sender, reconnect_frame(seconds)).await?;
    }
    Ok(())
}

/// Drive client input and device output concurrently until either side ends.
async fn serve_session(
    web: &mut WebTerminalSession,
    sender: &mut SplitSink<WebSocket, Message>,
    receiver: &mut SplitStream<WebSocket>,
) -> BridgeResult<()> {
    let id = web.id();
    let (reader, mut input) = web.split();
    let (replies_tx, mut replies_rx) = mpsc::channel(REPLY_QUEUE_SIZE);

    let result = tokio::select! {
        r = forward_output(reader, sender, &mut replies_rx) => r,
        r = forward_input(receiver, &mut input, replies_tx) => r,
    };
    if let Err(BridgeError::SessionClosed) = result {
        debug!("Web terminal session {} closed by client", id);
    }
    result
}

async fn forward_input(
    receiver: &mut SplitStream<WebSocket>,
    input: &mut WebInput<'_>,
    replies: mpsc::Sender<String>,
) -> BridgeResult<()> {
    loop {
        let frame = match receiver.next().await {
            Some(Ok(Message::Text(text))) => text.as_str().as_bytes().to_vec(),
            Some(Ok(Message::Binary(data))) => data.to_vec(),
            Some(Ok(Message::Close(_))) | None => return Err(BridgeError::SessionClosed),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(BridgeError::Protocol(e.to_string())),
        };

        match ClientMessage::parse(&frame)? {
            ClientMessage::Input(data) => {
                input.write(&data).await?;
            }
            ClientMessage::Ping => replies
                .send(pong_frame())
                .await
                .map_err(|_| BridgeError::SessionClosed)?,
            ClientMessage::Resize { columns, rows } => input.resize(columns, rows)?,
        }
    }
}

async fn forward_output(
    reader: &mut SessionReader,
    sender: &mut SplitSink<WebSocket, Message>,
    replies: &mut mpsc::Receiver<String>,
) -> BridgeResult<()> {
    let mut buf = vec![0u8; OUTPUT_BUFFER_SIZE];
    loop {
        let frame = tokio::select! {
            reply = replies.recv() => reply.ok_or(BridgeError::SessionClosed)?,
            read = reader.read(&mut buf) => {
                let n = read?;
                output_frame(&buf[..n])
            }
        };
        send_text(sender, frame).await?;
    }
}

async fn send_text(sender: &mut SplitSink<WebSocket, Message>, frame: String) -> BridgeResult<()> {
    sender.send(Message::Text(frame.into())).await.map_err(|e| {
        error!("Failed to send web terminal frame: {}", e);
        BridgeError::SessionClosed
    })
}
