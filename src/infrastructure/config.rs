use crate::domain::config::{BridgeConfig, ListenerConfig, Protocol, SerialSettings};
use crate::domain::error::{BridgeError, BridgeResult};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Settings file manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Manager for the per-user settings file
    pub fn new() -> BridgeResult<Self> {
        Ok(Self {
            config_path: Self::get_global_config_path()?,
        })
    }

    /// Manager for an explicitly chosen settings file
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: path.into(),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load settings, falling back to defaults when the file does not exist.
    pub fn load_config(&self) -> BridgeResult<BridgeConfig> {
        if !self.config_path.exists() {
            debug!("No settings file at {}, using defaults", self.config_path.display());
            return Ok(BridgeConfig::default());
        }
        self.load_config_from_path(&self.config_path)
    }

    fn get_global_config_path() -> BridgeResult<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| BridgeError::config("Could not determine home directory"))?;

        Ok(home.join(".config").join("serbridge").join("config.toml"))
    }

    /// Load settings from specific path
    pub fn load_config_from_path(&self, path: &Path) -> BridgeResult<BridgeConfig> {
        let content = fs::read_to_string(path).map_err(|e| {
            BridgeError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        toml::from_str(&content).map_err(|e| {
            BridgeError::config(format!("Failed to parse config file {}: {}", path.display(), e))
        })
    }
}

/// Read a ser2net-style listener file.
pub fn load_listener_file(path: &Path) -> BridgeResult<Vec<ListenerConfig>> {
    let content = fs::read_to_string(path).map_err(|e| {
        BridgeError::config(format!("Failed to read listener file {}: {}", path.display(), e))
    })?;
    Ok(parse_listener_config(&content))
}

/// Parse every usable listener line; malformed lines are skipped.
pub fn parse_listener_config(content: &str) -> Vec<ListenerConfig> {
    content.lines().filter_map(parse_listener_line).collect()
}

/// Parse one `<port>:<proto>:<unused>:<device>[:<options>]` line.
///
/// The line is classified by the first of `:telnet` / `:gotty` it contains,
/// and the second field must then name that same protocol.
pub fn parse_listener_line(line: &str) -> Option<ListenerConfig> {
    if line.is_empty() || line.starts_with("BANNER") {
        return None;
    }

    let protocol = if line.contains(":telnet") {
        Protocol::Telnet
    } else if line.contains(":gotty") {
        Protocol::WebTerminal
    } else {
        return None;
    };

    let fields: Vec<&str> = line.split(':').collect();
    if fields.len() < 4 || Protocol::from_token(fields[1]) != Some(protocol) {
        return None;
    }

    let port = match fields[0].trim().parse::<u16>() {
        Ok(port) => port,
        Err(_) => {
            warn!("Skipping listener line with bad port {:?}", fields[0]);
            return None;
        }
    };

    let baud = fields
        .get(4)
        .and_then(|options| options.split(' ').next())
        .and_then(|token| token.parse::<i64>().ok());

    Some(ListenerConfig {
        port,
        protocol,
        serial: SerialSettings::new(fields[3], baud),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::OverflowPolicy;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_config_manager_creation() {
        let manager = ConfigManager::new().unwrap();
        assert!(manager.config_path().ends_with(".config/serbridge/config.toml"));
    }

    #[test]
    fn test_missing_settings_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_path(temp_dir.path().join("absent.toml"));
        let config = manager.load_config().unwrap();

        assert_eq!(config.global.log_level, "info");
        assert_eq!(config.global.subscriber_capacity, 4096);
    }

    #[test]
    fn test_load_settings_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[global]\noverflow_policy = \"drop_newest\"\ncredential = \"a:b\"").unwrap();

        let config = ConfigManager::with_path(file.path()).load_config().unwrap();
        assert_eq!(config.global.overflow_policy, OverflowPolicy::DropNewest);
        assert_eq!(config.global.credential.as_deref(), Some("a:b"));
    }

    #[test]
    fn test_invalid_settings_file_is_config_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[global\nlog_level = ").unwrap();

        let err = ConfigManager::with_path(file.path()).load_config().unwrap_err();
        assert!(matches!(err, BridgeError::Config { .. }));
    }

    #[test]
    fn test_parse_telnet_line_with_baud() {
        let listener = parse_listener_line("2000:telnet:600:/dev/ttyS0:9600 8DATABITS NONE").unwrap();
        assert_eq!(listener.port, 2000);
        assert_eq!(listener.protocol, Protocol::Telnet);
        assert_eq!(listener.serial.path, "/dev/ttyS0");
        assert_eq!(listener.serial.baud_rate, 9600);
    }

    #[test]
    fn test_parse_gotty_line_defaults_baud() {
        let listener = parse_listener_line("8080:gotty:0:/dev/ttyUSB1").unwrap();
        assert_eq!(listener.protocol, Protocol::WebTerminal);
        assert_eq!(listener.serial.baud_rate, 115_200);

        let listener = parse_listener_line("8080:gotty:0:/dev/ttyUSB1:fast").unwrap();
        assert_eq!(listener.serial.baud_rate, 115_200);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        assert!(parse_listener_line("").is_none());
        assert!(parse_listener_line("BANNER:banner1:hello").is_none());
        assert!(parse_listener_line("2000:telnet:600").is_none());
        assert!(parse_listener_line("2000:raw:600:/dev/ttyS0:9600").is_none());
        // classified as telnet, but the protocol field disagrees
        assert!(parse_listener_line("2000:gotty:600:/dev/ttyS0:telnet").is_none());
        assert!(parse_listener_line("port:telnet:600:/dev/ttyS0").is_none());
    }

    #[test]
    fn test_load_listener_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            "BANNER:banner:welcome\n\n2000:telnet:600:/dev/ttyS0:9600\n2001:gotty:0:/dev/ttyS0\n3000:raw:0:/dev/ttyS1\n"
        )
        .unwrap();

        let listeners = load_listener_file(file.path()).unwrap();
        assert_eq!(listeners.len(), 2);
        assert_eq!(listeners[0].port, 2000);
        assert_eq!(listeners[1].protocol, Protocol::WebTerminal);
        assert_eq!(listeners[1].serial.path, "/dev/ttyS0");
    }

    #[test]
    fn test_missing_listener_file_is_config_error() {
        let err = load_listener_file(Path::new("/nonexistent/serbridge.conf")).unwrap_err();
        assert!(matches!(err, BridgeError::Config { .. }));
    }
}
