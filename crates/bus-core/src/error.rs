use crate::measurement::EngineStatus;
use std::io;

/// Failure reported by a bus handle for a single operation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BusError {
    #[error("bus I/O error ({kind:?}): {message}")]
    Io { kind: io::ErrorKind, message: String },

    #[error("bus operation timed out")]
    Timeout,

    #[error("hardware fault: {0}")]
    Hardware(String),

    #[error("buffer length mismatch: tx={tx} rx={rx}")]
    BufferMismatch { tx: usize, rx: usize },
}

impl From<io::Error> for BusError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut => BusError::Timeout,
            kind => BusError::Io {
                kind,
                message: err.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// The platform has no bus capability at all.
    #[error("bus capability not supported on this platform: {0}")]
    UnsupportedPlatform(String),

    /// Discovery finished but no matching device was found or opened.
    #[error("bus device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("invalid engine state: expected {expected:?}, found {actual:?}")]
    InvalidState {
        expected: EngineStatus,
        actual: EngineStatus,
    },

    #[error("invalid measurement config: {0}")]
    InvalidConfig(String),

    #[error("transfer {iteration} failed: {source}")]
    TransferFailure {
        iteration: u32,
        #[source]
        source: BusError,
    },

    #[error("failed to spawn engine thread: {0}")]
    Spawn(String),

    #[error("engine thread panicked")]
    WorkerPanicked,

    #[error("failed to release bus: {0}")]
    Release(#[source] BusError),
}

impl EngineError {
    /// True when the bus will never become usable for this engine.
    pub fn is_device_error(&self) -> bool {
        matches!(
            self,
            EngineError::UnsupportedPlatform(_) | EngineError::DeviceUnavailable(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_timeout_maps_to_timeout() {
        let err = io::Error::new(io::ErrorKind::TimedOut, "spi stalled");
        assert_eq!(BusError::from(err), BusError::Timeout);
    }

    #[test]
    fn io_error_keeps_kind_and_message() {
        let err = io::Error::new(io::ErrorKind::PermissionDenied, "no access");
        match BusError::from(err) {
            BusError::Io { kind, message } => {
                assert_eq!(kind, io::ErrorKind::PermissionDenied);
                assert!(message.contains("no access"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn device_errors_are_classified() {
        assert!(EngineError::DeviceUnavailable("none".into()).is_device_error());
        assert!(EngineError::UnsupportedPlatform("wasm".into()).is_device_error());
        assert!(!EngineError::WorkerPanicked.is_device_error());
    }
}
