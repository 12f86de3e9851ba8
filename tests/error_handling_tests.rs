use serbridge::{BridgeError, BridgeResult};
use std::error::Error;

/// Error handling and resilience tests
#[cfg(test)]
mod error_handling_tests {
    use super::*;

    #[test]
    fn test_error_types() {
        let errors = vec![
            BridgeError::Config { message: "Config error".to_string() },
            BridgeError::SessionClosed,
            BridgeError::Cancelled,
            BridgeError::Protocol("bad frame".to_string()),
            BridgeError::InvalidInput("Invalid input".to_string()),
        ];

        for error in errors {
            assert!(!error.to_string().is_empty(), "Error display should not be empty");
        }

        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<BridgeError>();
    }

    #[test]
    fn test_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "device removed");
        let error: BridgeError = io_error.into();

        assert!(matches!(error, BridgeError::Io(_)));
        assert!(error.to_string().contains("device removed"));
        assert!(error.source().is_some());
    }

    #[test]
    fn test_serial_error_conversion() {
        let serial_error = serialport::Error::new(serialport::ErrorKind::NoDevice, "gone");
        let error: BridgeError = serial_error.into();
        assert!(error.to_string().starts_with("Serial port error"));
    }

    #[test]
    fn test_session_local_classification() {
        assert!(BridgeError::SessionClosed.is_session_local());
        assert!(BridgeError::Protocol("x".to_string()).is_session_local());
        assert!(!BridgeError::Cancelled.is_session_local());
        assert!(!BridgeError::config("x").is_session_local());
    }

    #[test]
    fn test_error_propagation() {
        fn parse_port(value: &str) -> BridgeResult<u16> {
            value
                .parse()
                .map_err(|_| BridgeError::InvalidInput(format!("bad port {}", value)))
        }

        fn open(value: &str) -> BridgeResult<u16> {
            let port = parse_port(value)?;
            Ok(port)
        }

        assert_eq!(open("2000").unwrap(), 2000);
        assert!(matches!(open("telnet"), Err(BridgeError::InvalidInput(_))));
    }
}
