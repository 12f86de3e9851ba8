//! Web-terminal wire protocol.
//!
//! Every websocket text frame starts with a one-character message type.
//! Client to server: `1` input, `2` ping, `3` resize (JSON body).
//! Server to client: `1` output (base64 body), `2` pong, `3` window title,
//! `4` terminal preferences (JSON body), `5` reconnect delay in seconds.

use crate::domain::error::{BridgeError, BridgeResult};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const INPUT: char = '1';
pub const PING: char = '2';
pub const RESIZE_TERMINAL: char = '3';

pub const OUTPUT: char = '1';
pub const PONG: char = '2';
pub const SET_WINDOW_TITLE: char = '3';
pub const SET_PREFERENCES: char = '4';
pub const SET_RECONNECT: char = '5';

/// Title template used when none is configured.
pub const DEFAULT_TITLE: &str = "{command}@{hostname}";

/// Seconds a disconnected client waits before reconnecting.
pub const DEFAULT_RECONNECT_SECS: u64 = 10;

/// Terminal emulator preferences pushed to the client on connect.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TerminalPreferences {
    /// Backspace sends BS rather than DEL.
    #[serde(rename = "backspace-sends-backspace")]
    pub backspace_sends_backspace: bool,
}

impl Default for TerminalPreferences {
    fn default() -> Self {
        Self {
            backspace_sends_backspace: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Input(Vec<u8>),
    Ping,
    Resize { columns: u16, rows: u16 },
}

#[derive(Debug, Deserialize)]
struct ResizeRequest {
    columns: f64,
    rows: f64,
}

impl ClientMessage {
    pub fn parse(frame: &[u8]) -> BridgeResult<Self> {
        let (&kind, body) = frame
            .split_first()
            .ok_or_else(|| BridgeError::Protocol("empty frame".to_string()))?;

        match kind as char {
            INPUT => Ok(ClientMessage::Input(body.to_vec())),
            PING => Ok(ClientMessage::Ping),
            RESIZE_TERMINAL => {
                let request: ResizeRequest = serde_json::from_slice(body)
                    .map_err(|e| BridgeError::Protocol(format!("bad resize request: {}", e)))?;
                Ok(ClientMessage::Resize {
                    columns: clamp_dimension(request.columns),
                    rows: clamp_dimension(request.rows),
                })
            }
            other => Err(BridgeError::Protocol(format!(
                "unknown message type {:?}",
                other
            ))),
        }
    }
}

fn clamp_dimension(value: f64) -> u16 {
    value.clamp(0.0, u16::MAX as f64) as u16
}

pub fn output_frame(data: &[u8]) -> String {
    let mut frame = String::with_capacity(1 + data.len().div_ceil(3) * 4);
    frame.push(OUTPUT);
    STANDARD.encode_string(data, &mut frame);
    frame
}

pub fn pong_frame() -> String {
    PONG.to_string()
}

pub fn title_frame(title: &str) -> String {
    format!("{}{}", SET_WINDOW_TITLE, title)
}

pub fn preferences_frame(preferences: &TerminalPreferences) -> BridgeResult<String> {
    let body = serde_json::to_string(preferences)
        .map_err(|e| BridgeError::Protocol(format!("cannot encode preferences: {}", e)))?;
    Ok(format!("{}{}", SET_PREFERENCES, body))
}

pub fn reconnect_frame(seconds: u64) -> String {
    format!("{}{}", SET_RECONNECT, seconds)
}

/// Expand `{name}` placeholders from the session's title variables.
/// Unknown placeholders are left as written.
pub fn render_title(template: &str, variables: &BTreeMap<String, serde_json::Value>) -> String {
    let mut title = template.to_string();
    for (name, value) in variables {
        let text = match value {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(" "),
            other => other.to_string(),
        };
        title = title.replace(&format!("{{{}}}", name), &text);
    }
    title
}

/// Check an `Authorization` header value against a `user:password` credential.
pub fn basic_auth_matches(header: Option<&str>, credential: &str) -> bool {
    let Some(encoded) = header.and_then(|h| h.strip_prefix("Basic ")) else {
        return false;
    };
    match STANDARD.decode(encoded.trim()) {
        Ok(decoded) => decoded == credential.as_bytes(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_client_messages() {
        assert_eq!(
            ClientMessage::parse(b"1ls\r").unwrap(),
            ClientMessage::Input(b"ls\r".to_vec())
        );
        assert_eq!(ClientMessage::parse(b"2").unwrap(), ClientMessage::Ping);
        assert_eq!(
            ClientMessage::parse(br#"3{"columns":80,"rows":24}"#).unwrap(),
            ClientMessage::Resize { columns: 80, rows: 24 }
        );
    }

    #[test]
    fn test_parse_rejects_bad_frames() {
        assert!(ClientMessage::parse(b"").is_err());
        assert!(ClientMessage::parse(b"9x").is_err());
        assert!(ClientMessage::parse(b"3{\"columns\":80}").is_err());
    }

    #[test]
    fn test_output_frame_is_base64() {
        assert_eq!(output_frame(b"hello\r\n"), "1aGVsbG8NCg==");
        assert_eq!(output_frame(b""), "1");
    }

    #[test]
    fn test_session_setup_frames() {
        assert_eq!(title_frame("serbridge@lab1"), "3serbridge@lab1");
        assert_eq!(
            preferences_frame(&TerminalPreferences::default()).unwrap(),
            r#"4{"backspace-sends-backspace":true}"#
        );
        assert_eq!(reconnect_frame(DEFAULT_RECONNECT_SECS), "510");
    }

    #[test]
    fn test_render_title() {
        let mut variables = BTreeMap::new();
        variables.insert("command".to_string(), json!("serbridge"));
        variables.insert("argv".to_string(), json!(["--dev", "/dev/ttyUSB0"]));
        variables.insert("hostname".to_string(), json!("lab1"));

        assert_eq!(render_title(DEFAULT_TITLE, &variables), "serbridge@lab1");
        assert_eq!(render_title("{argv} {missing}", &variables), "--dev /dev/ttyUSB0 {missing}");
    }

    #[test]
    fn test_basic_auth() {
        // "admin:secret"
        let header = Some("Basic YWRtaW46c2VjcmV0");
        assert!(basic_auth_matches(header, "admin:secret"));
        assert!(!basic_auth_matches(header, "admin:other"));
        assert!(!basic_auth_matches(Some("Bearer abc"), "admin:secret"));
        assert!(!basic_auth_matches(None, "admin:secret"));
    }
}
