// Serial module - Device transport implementation
pub mod device;
pub mod mock;

pub use device::{DeviceOpener, DevicePort, SerialDevice};
pub use mock::MockDevice;
