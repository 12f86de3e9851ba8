//! In-memory device for exercising the bridge without hardware.
//!
//! A `MockDevice` is a cheap handle onto shared state: tests keep one clone to
//! script the device (preload bytes, fail opens, unplug it) while the bridge
//! opens ports through another.

use super::device::{DeviceOpener, DevicePort};
use crate::domain::error::{BridgeError, BridgeResult};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Default)]
struct MockState {
    present: bool,
    failing_opens: u32,
    open_attempts: u64,
    live_handles: u32,
    max_live_handles: u32,
    read_queue: VecDeque<u8>,
    read_fault: Option<io::ErrorKind>,
    read_fault_sticky: bool,
    write_fault: Option<io::ErrorKind>,
    written: Vec<u8>,
}

/// Scriptable device implementing `DeviceOpener`.
#[derive(Debug, Clone)]
pub struct MockDevice {
    path: String,
    idle_delay: Duration,
    state: Arc<Mutex<MockState>>,
}

impl MockDevice {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            idle_delay: Duration::from_millis(5),
            state: Arc::new(Mutex::new(MockState {
                present: true,
                ..Default::default()
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Bytes the device will send once opened.
    pub fn preload(&self, data: &[u8]) {
        self.state().read_queue.extend(data);
    }

    pub fn fail_next_opens(&self, count: u32) {
        self.state().failing_opens = count;
    }

    /// Simulate unplugging (`false`) or replugging (`true`) the device.
    pub fn set_present(&self, present: bool) {
        self.state().present = present;
    }

    /// Make the next read fail with `kind`.
    pub fn inject_read_fault(&self, kind: io::ErrorKind) {
        let mut state = self.state();
        state.read_fault = Some(kind);
        state.read_fault_sticky = false;
    }

    /// Make every read fail with `kind`, like a wedged adapter whose node
    /// stays present.
    pub fn inject_persistent_read_fault(&self, kind: io::ErrorKind) {
        let mut state = self.state();
        state.read_fault = Some(kind);
        state.read_fault_sticky = true;
    }

    /// Make the next write fail with `kind`.
    pub fn inject_write_fault(&self, kind: io::ErrorKind) {
        self.state().write_fault = Some(kind);
    }

    /// Everything written to the device so far.
    pub fn written(&self) -> Vec<u8> {
        self.state().written.clone()
    }

    pub fn open_attempts(&self) -> u64 {
        self.state().open_attempts
    }

    /// Highest number of simultaneously open handles (clones excluded).
    pub fn max_live_handles(&self) -> u32 {
        self.state().max_live_handles
    }

    pub fn live_handles(&self) -> u32 {
        self.state().live_handles
    }
}

impl DeviceOpener for MockDevice {
    fn path(&self) -> &str {
        &self.path
    }

    fn open(&self) -> BridgeResult<Box<dyn DevicePort>> {
        let mut state = self.state();
        state.open_attempts += 1;

        if !state.present {
            return Err(BridgeError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                "no such device",
            )));
        }
        if state.failing_opens > 0 {
            state.failing_opens -= 1;
            return Err(BridgeError::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "device busy",
            )));
        }

        state.live_handles += 1;
        state.max_live_handles = state.max_live_handles.max(state.live_handles);
        drop(state);

        Ok(Box::new(MockPort {
            device: self.clone(),
            primary: true,
        }))
    }

    fn is_present(&self) -> bool {
        self.state().present
    }
}

struct MockPort {
    device: MockDevice,
    primary: bool,
}

impl DevicePort for MockPort {
    fn read_bytes(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        let mut state = self.device.state();
        if let Some(kind) = state.read_fault {
            if !state.read_fault_sticky {
                state.read_fault = None;
            }
            return Err(io::Error::new(kind, "injected read fault"));
        }
        if !state.present {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device removed"));
        }

        if state.read_queue.is_empty() {
            drop(state);
            std::thread::sleep(self.device.idle_delay);
            return Err(io::Error::from(io::ErrorKind::TimedOut));
        }

        let n = buffer.len().min(state.read_queue.len());
        for (slot, byte) in buffer.iter_mut().zip(state.read_queue.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write_all_bytes(&mut self, data: &[u8]) -> io::Result<()> {
        let mut state = self.device.state();
        if let Some(kind) = state.write_fault.take() {
            return Err(io::Error::new(kind, "injected write fault"));
        }
        if !state.present {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device removed"));
        }
        state.written.extend_from_slice(data);
        Ok(())
    }

    fn try_clone_port(&self) -> io::Result<Box<dyn DevicePort>> {
        Ok(Box::new(MockPort {
            device: self.device.clone(),
            primary: false,
        }))
    }
}

impl Drop for MockPort {
    fn drop(&mut self) {
        if self.primary {
            let mut state = self.device.state();
            state.live_handles = state.live_handles.saturating_sub(1);
        }
    }
}
