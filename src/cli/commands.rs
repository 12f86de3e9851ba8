use crate::cli::args::{Args, Mode};
use crate::core::bridge::BridgeSettings;
use crate::core::registry::BridgeRegistry;
use crate::domain::config::{BridgeConfig, Protocol, SerialSettings};
use crate::domain::error::{BridgeError, BridgeResult};
use crate::infrastructure::config::{load_listener_file, ConfigManager};
use crate::infrastructure::logging::init_logging;
use crate::infrastructure::serial::{DeviceOpener, SerialDevice};
use crate::infrastructure::stdio::run_stdio;
use crate::infrastructure::telnet::TelnetServer;
use crate::infrastructure::web::protocol::DEFAULT_TITLE;
use crate::infrastructure::web::{WebOptions, WebServer};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const DEFAULT_BIND: &str = "0.0.0.0";

/// One device exposed one way
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub mode: Mode,
    pub bind: String,
    pub port: u16,
    pub serial: SerialSettings,
}

impl Endpoint {
    pub fn address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

impl From<Protocol> for Mode {
    fn from(protocol: Protocol) -> Self {
        match protocol {
            Protocol::Telnet => Mode::Telnet,
            Protocol::WebTerminal => Mode::WebTerminal,
        }
    }
}

/// Execute CLI command
pub async fn execute_command(args: Args) -> BridgeResult<()> {
    let config_manager = match &args.settings {
        Some(path) => ConfigManager::with_path(path),
        None => ConfigManager::new()?,
    };
    let config = config_manager.load_config()?;

    let level = if args.verbose { "debug" } else { config.global.log_level.as_str() };
    init_logging(level)
        .map_err(|e| BridgeError::config(format!("Failed to initialize logging: {}", e)))?;

    let endpoints = plan_endpoints(&args)?;
    run_endpoints(endpoints, &args, &config).await
}

/// Turn the command line (and listener file, if any) into endpoints.
pub fn plan_endpoints(args: &Args) -> BridgeResult<Vec<Endpoint>> {
    let bind = args.bind.clone().unwrap_or_else(|| DEFAULT_BIND.to_string());

    if let Some(path) = &args.config {
        let endpoints: Vec<Endpoint> = load_listener_file(path)?
            .into_iter()
            .map(|listener| Endpoint {
                mode: listener.protocol.into(),
                bind: bind.clone(),
                port: listener.port,
                serial: listener.serial,
            })
            .collect();

        if endpoints.is_empty() {
            return Err(BridgeError::config(format!(
                "No telnet or gotty listeners in {}",
                path.display()
            )));
        }
        return Ok(endpoints);
    }

    let dev = args
        .dev
        .as_deref()
        .ok_or_else(|| BridgeError::config("Device path not set and config not given"))?;
    let mode = args
        .mode()
        .ok_or_else(|| BridgeError::config("Must specify one of --telnet, --gotty, --stdin"))?;

    Ok(vec![Endpoint {
        mode,
        bind,
        port: args.port,
        serial: SerialSettings::new(dev, args.baud),
    }])
}

async fn run_endpoints(endpoints: Vec<Endpoint>, args: &Args, config: &BridgeConfig) -> BridgeResult<()> {
    let cancel = CancellationToken::new();
    let read_timeout = config.global.read_timeout();
    let mut registry = BridgeRegistry::new(BridgeSettings::from(&config.global), cancel.clone());

    let web_options = WebOptions {
        credential: args.credential.clone().or_else(|| config.global.credential.clone()),
        title: config
            .global
            .web_title
            .clone()
            .unwrap_or_else(|| DEFAULT_TITLE.to_string()),
        ..WebOptions::default()
    };

    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, shutting down");
            ctrl_c.cancel();
        }
    });

    let mut listeners: Vec<JoinHandle<BridgeResult<()>>> = Vec::new();
    let mut stdio = None;
    let mut opened_baud: HashMap<String, u32> = HashMap::new();

    for endpoint in endpoints {
        match opened_baud.get(&endpoint.serial.path) {
            Some(&baud) if baud != endpoint.serial.baud_rate => warn!(
                "{} already opened at baud {}; ignoring {}",
                endpoint.serial.path, baud, endpoint.serial.baud_rate
            ),
            Some(_) => {}
            None => {
                opened_baud.insert(endpoint.serial.path.clone(), endpoint.serial.baud_rate);
            }
        }
        let serial = endpoint.serial.clone();
        let bridge = registry.get_or_spawn(&endpoint.serial.path, || {
            Arc::new(SerialDevice::new(serial, read_timeout)) as Arc<dyn DeviceOpener>
        });

        info!(
            "{:?} on {} baud {}, device {}",
            endpoint.mode,
            endpoint.address(),
            endpoint.serial.baud_rate,
            endpoint.serial.path
        );

        let started = match endpoint.mode {
            Mode::Telnet => match TelnetServer::bind(&endpoint.address(), bridge).await {
                Ok(server) => {
                    listeners.push(tokio::spawn(Arc::new(server).run(cancel.clone())));
                    Ok(())
                }
                Err(e) => Err(e),
            },
            Mode::WebTerminal => {
                match WebServer::bind(&endpoint.address(), bridge, web_options.clone()).await {
                    Ok(server) => {
                        listeners.push(tokio::spawn(server.run(cancel.clone())));
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            Mode::Stdio => {
                stdio = Some(bridge);
                Ok(())
            }
        };

        if let Err(e) = started {
            registry.shutdown().await;
            return Err(e);
        }
    }

    if let Some(bridge) = stdio {
        let result = tokio::select! {
            r = run_stdio(&bridge) => r,
            _ = cancel.cancelled() => Ok(()),
        };
        match result {
            Ok(()) | Err(BridgeError::Cancelled) => {}
            Err(e) => warn!("Stdio session ended: {}", e),
        }
        cancel.cancel();
    }

    for listener in listeners {
        match listener.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Listener failed: {}", e),
            Err(e) => error!("Listener task failed: {}", e),
        }
    }

    registry.shutdown().await;
    Ok(())
}
