use crate::core::session::{
    ByteStream, Session, SessionId, SessionReader, SessionWriter, TerminalGeometry, WindowTitle,
};
use crate::domain::error::BridgeResult;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// Process-wide values shown in every web-terminal title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleInfo {
    pub command: String,
    pub argv: Vec<String>,
    pub hostname: String,
}

impl TitleInfo {
    /// Collect the running command line and host name.
    pub fn from_env() -> Self {
        let mut args = std::env::args();
        let command = args.next().unwrap_or_else(|| "serbridge".to_string());
        Self {
            command,
            argv: args.collect(),
            hostname: local_hostname(),
        }
    }
}

fn local_hostname() -> String {
    std::fs::read_to_string("/etc/hostname")
        .ok()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok())
        .or_else(|| std::env::var("COMPUTERNAME").ok())
        .unwrap_or_else(|| "localhost".to_string())
}

/// A bridge session as seen by the web terminal.
pub struct WebTerminalSession {
    session: Session,
    device: String,
    title: TitleInfo,
    size: Option<(u16, u16)>,
}

impl WebTerminalSession {
    pub fn new(session: Session, device: impl Into<String>, title: TitleInfo) -> Self {
        Self {
            session,
            device: device.into(),
            title,
            size: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.session.id()
    }

    /// Last geometry reported by the client.
    pub fn size(&self) -> Option<(u16, u16)> {
        self.size
    }

    /// Device output and client input as separately borrowed sides.
    pub fn split(&mut self) -> (&mut SessionReader, WebInput<'_>) {
        let (reader, writer) = self.session.halves();
        (
            reader,
            WebInput {
                writer,
                size: &mut self.size,
            },
        )
    }
}

/// Client-input side of a web session.
pub struct WebInput<'a> {
    writer: &'a mut SessionWriter,
    size: &'a mut Option<(u16, u16)>,
}

impl WebInput<'_> {
    pub async fn write(&mut self, data: &[u8]) -> BridgeResult<usize> {
        self.writer.write(data).await
    }
}

impl TerminalGeometry for WebInput<'_> {
    fn resize(&mut self, columns: u16, rows: u16) -> BridgeResult<()> {
        record_size(self.writer.id(), self.size, columns, rows);
        Ok(())
    }
}

// A serial console has no window size; only remember it.
fn record_size(id: SessionId, size: &mut Option<(u16, u16)>, columns: u16, rows: u16) {
    debug!("Session {} resized to {}x{}", id, columns, rows);
    *size = Some((columns, rows));
}

#[async_trait]
impl ByteStream for WebTerminalSession {
    async fn read(&mut self, buf: &mut [u8]) -> BridgeResult<usize> {
        self.session.read(buf).await
    }

    async fn write(&mut self, data: &[u8]) -> BridgeResult<usize> {
        self.session.write(data).await
    }

    async fn close(&mut self) -> BridgeResult<()> {
        self.session.close().await
    }
}

impl TerminalGeometry for WebTerminalSession {
    fn resize(&mut self, columns: u16, rows: u16) -> BridgeResult<()> {
        record_size(self.session.id(), &mut self.size, columns, rows);
        Ok(())
    }
}

impl WindowTitle for WebTerminalSession {
    fn title_variables(&self) -> BTreeMap<String, Value> {
        BTreeMap::from([
            ("command".to_string(), json!(self.title.command)),
            ("argv".to_string(), json!(self.title.argv)),
            ("hostname".to_string(), json!(self.title.hostname)),
            ("device".to_string(), json!(self.device)),
        ])
    }
}
