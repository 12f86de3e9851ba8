use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Baud rate used when none (or a non-positive one) is configured.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// SerBridge settings file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Global configuration
    #[serde(default)]
    pub global: GlobalConfig,
}

/// Global configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Default log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Capacity of each session's receive queue, in bytes
    #[serde(default = "default_queue_capacity")]
    pub subscriber_capacity: usize,
    /// Capacity of the shared transmit queue, in bytes
    #[serde(default = "default_queue_capacity")]
    pub transmit_capacity: usize,
    /// Device presence polling interval in milliseconds
    #[serde(default = "default_interval")]
    pub poll_interval_ms: u64,
    /// Delay between failed open attempts in milliseconds
    #[serde(default = "default_interval")]
    pub retry_interval_ms: u64,
    /// Serial read timeout in milliseconds
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
    /// What the hub does when a session's receive queue is full
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,
    /// Window title announced to web-terminal clients
    #[serde(default)]
    pub web_title: Option<String>,
    /// Static `user:password` credential for the web terminal
    #[serde(default)]
    pub credential: Option<String>,
}

/// Delivery policy for a subscriber whose queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Wait for the slow session; stalls every other session and the read pump.
    #[default]
    Block,
    /// Drop bytes destined for the full session only.
    DropNewest,
}

/// Network protocol served on a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Telnet,
    #[serde(rename = "gotty")]
    WebTerminal,
}

impl Protocol {
    /// Token used for this protocol in listener files.
    pub fn token(&self) -> &'static str {
        match self {
            Protocol::Telnet => "telnet",
            Protocol::WebTerminal => "gotty",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "telnet" => Some(Protocol::Telnet),
            "gotty" => Some(Protocol::WebTerminal),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// One network listener bound to one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerConfig {
    pub port: u16,
    pub protocol: Protocol,
    pub serial: SerialSettings,
}

/// Device open parameters. Framing is fixed at 8N1 without flow control.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SerialSettings {
    pub path: String,
    pub baud_rate: u32,
}

impl SerialSettings {
    /// Build settings, replacing a missing or non-positive baud with the default.
    pub fn new(path: impl Into<String>, baud: Option<i64>) -> Self {
        let baud_rate = match baud {
            Some(b) if b > 0 && b <= u32::MAX as i64 => b as u32,
            _ => DEFAULT_BAUD_RATE,
        };
        Self {
            path: path.into(),
            baud_rate,
        }
    }
}

impl GlobalConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms.max(1))
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_queue_capacity() -> usize {
    4096
}

fn default_interval() -> u64 {
    1000
}

fn default_read_timeout() -> u64 {
    100
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            subscriber_capacity: default_queue_capacity(),
            transmit_capacity: default_queue_capacity(),
            poll_interval_ms: default_interval(),
            retry_interval_ms: default_interval(),
            read_timeout_ms: default_read_timeout(),
            overflow_policy: OverflowPolicy::default(),
            web_title: None,
            credential: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_serialization() {
        let config = BridgeConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: BridgeConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(deserialized.global.subscriber_capacity, 4096);
        assert_eq!(deserialized.global.overflow_policy, OverflowPolicy::Block);
    }

    #[test]
    fn test_partial_global_section() {
        let config: BridgeConfig = toml::from_str(
            r#"
            [global]
            log_level = "debug"
            overflow_policy = "drop_newest"
            "#,
        )
        .unwrap();

        assert_eq!(config.global.log_level, "debug");
        assert_eq!(config.global.overflow_policy, OverflowPolicy::DropNewest);
        assert_eq!(config.global.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.global.read_timeout(), Duration::from_millis(100));
    }

    #[test]
    fn test_serial_settings_baud_fallback() {
        assert_eq!(SerialSettings::new("/dev/ttyS0", None).baud_rate, 115_200);
        assert_eq!(SerialSettings::new("/dev/ttyS0", Some(0)).baud_rate, 115_200);
        assert_eq!(SerialSettings::new("/dev/ttyS0", Some(-9600)).baud_rate, 115_200);
        assert_eq!(SerialSettings::new("/dev/ttyS0", Some(9600)).baud_rate, 9600);
    }

    #[test]
    fn test_protocol_tokens() {
        assert_eq!(Protocol::from_token("telnet"), Some(Protocol::Telnet));
        assert_eq!(Protocol::from_token("gotty"), Some(Protocol::WebTerminal));
        assert_eq!(Protocol::from_token("raw"), None);
        assert_eq!(Protocol::WebTerminal.to_string(), "gotty");
    }
}
