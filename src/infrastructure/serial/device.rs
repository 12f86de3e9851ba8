use crate::domain::config::SerialSettings;
use crate::domain::error::BridgeResult;
use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Byte-level access to an open device handle.
///
/// Reads return `TimedOut` when no data arrived within the read timeout.
/// Dropping the handle closes it.
pub trait DevicePort: Send {
    fn read_bytes(&mut self, buffer: &mut [u8]) -> io::Result<usize>;

    fn write_all_bytes(&mut self, data: &[u8]) -> io::Result<()>;

    /// Second handle to the same open device, used by the write pump.
    fn try_clone_port(&self) -> io::Result<Box<dyn DevicePort>>;
}

/// Opens handles to one device path.
pub trait DeviceOpener: Send + Sync {
    fn path(&self) -> &str;

    /// Single open attempt.
    fn open(&self) -> BridgeResult<Box<dyn DevicePort>>;

    /// Whether the device node currently exists.
    fn is_present(&self) -> bool;
}

/// Errors a pump retries in place instead of dropping the device.
pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

/// Open the device, sleeping `interval` between failed attempts.
///
/// Never reports an open failure; returns `None` only when cancelled.
pub async fn open_with_retry(
    opener: Arc<dyn DeviceOpener>,
    interval: Duration,
    cancel: &CancellationToken,
) -> Option<Box<dyn DevicePort>> {
    let mut attempts: u64 = 0;
    loop {
        if cancel.is_cancelled() {
            return None;
        }
        attempts += 1;

        let attempt = Arc::clone(&opener);
        let result = match tokio::task::spawn_blocking(move || attempt.open()).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Open task for {} failed: {}", opener.path(), e);
                return None;
            }
        };

        match result {
            Ok(port) => {
                info!("Opened {} after {} attempt(s)", opener.path(), attempts);
                return Some(port);
            }
            Err(e) if attempts == 1 => {
                warn!("Cannot open {}: {}; retrying every {:?}", opener.path(), e, interval)
            }
            Err(e) => debug!("Open attempt {} for {} failed: {}", attempts, opener.path(), e),
        }

        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

/// Real serial device opened through the `serialport` crate at 8N1.
#[derive(Debug, Clone)]
pub struct SerialDevice {
    settings: SerialSettings,
    read_timeout: Duration,
}

impl SerialDevice {
    pub fn new(settings: SerialSettings, read_timeout: Duration) -> Self {
        Self {
            settings,
            read_timeout,
        }
    }
}

impl DeviceOpener for SerialDevice {
    fn path(&self) -> &str {
        &self.settings.path
    }

    fn open(&self) -> BridgeResult<Box<dyn DevicePort>> {
        let port = serialport::new(&self.settings.path, self.settings.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(self.read_timeout)
            .open()?;

        info!(
            "Serial port {} opened at {} baud",
            self.settings.path, self.settings.baud_rate
        );
        Ok(Box::new(SerialPortHandle { port }))
    }

    fn is_present(&self) -> bool {
        Path::new(&self.settings.path).exists()
    }
}

struct SerialPortHandle {
    port: Box<dyn SerialPort>,
}

impl DevicePort for SerialPortHandle {
    fn read_bytes(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        self.port.read(buffer)
    }

    fn write_all_bytes(&mut self, data: &[u8]) -> io::Result<()> {
        self.port.write_all(data)?;
        self.port.flush()
    }

    fn try_clone_port(&self) -> io::Result<Box<dyn DevicePort>> {
        let port = self.port.try_clone().map_err(io::Error::from)?;
        Ok(Box::new(SerialPortHandle { port }))
    }
}
