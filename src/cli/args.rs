use clap::{ArgGroup, Parser};
use std::path::PathBuf;

/// Command line arguments for SerBridge
#[derive(Parser, Debug)]
#[command(
    name = "serbridge",
    version = env!("CARGO_PKG_VERSION"),
    about = "Serial-port-to-network gateway",
    long_about = "Opens a serial device and shares it with Telnet clients, browser terminals or the local terminal, reconnecting whenever the device comes back.",
    group(ArgGroup::new("source").required(true).args(["dev", "config"])),
    group(ArgGroup::new("mode").args(["telnet", "gotty", "stdin"]))
)]
pub struct Args {
    /// Hostname or IP to bind listeners to
    #[arg(long)]
    pub bind: Option<String>,

    /// Serial device to open
    #[arg(long, requires = "mode")]
    pub dev: Option<String>,

    /// ser2net-style listener file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Listener port used with --dev
    #[arg(long, default_value = "0")]
    pub port: u16,

    /// Baud rate used with --dev
    #[arg(long, allow_negative_numbers = true)]
    pub baud: Option<i64>,

    /// Serve the device over Telnet
    #[arg(long)]
    pub telnet: bool,

    /// Serve the device as a browser terminal
    #[arg(long)]
    pub gotty: bool,

    /// Attach the device to stdin/stdout
    #[arg(long)]
    pub stdin: bool,

    /// user:password required by the browser terminal
    #[arg(long)]
    pub credential: Option<String>,

    /// Settings file (defaults to ~/.config/serbridge/config.toml)
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// How a device is exposed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Telnet,
    WebTerminal,
    Stdio,
}

impl Args {
    /// Mode selected for --dev
    pub fn mode(&self) -> Option<Mode> {
        if self.telnet {
            Some(Mode::Telnet)
        } else if self.gotty {
            Some(Mode::WebTerminal)
        } else if self.stdin {
            Some(Mode::Stdio)
        } else {
            None
        }
    }
}
