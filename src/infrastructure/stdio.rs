//! Stdio adapter: the process's own stdin/stdout as a single session.

use crate::core::bridge::Bridge;
use crate::core::session::{pump_stream, Passthrough};
use crate::domain::error::BridgeResult;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::info;

/// Attach stdin/stdout to the bridge until stdin closes or the bridge stops.
pub async fn run_stdio(bridge: &Bridge) -> BridgeResult<()> {
    run_stream(bridge, tokio::io::stdin(), tokio::io::stdout()).await
}

pub async fn run_stream<R, W>(bridge: &Bridge, input: R, output: W) -> BridgeResult<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let session = bridge.open_session().await?;
    info!("Stdio session {} attached to {}", session.id(), bridge.path());
    pump_stream(session, input, output, Passthrough, Passthrough).await
}
