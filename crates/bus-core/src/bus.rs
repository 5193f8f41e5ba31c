use crate::error::{BusError, EngineError};
use crate::measurement::TransferMethod;
use serde::{Deserialize, Serialize};

/// Blocking transfer capability of one acquired bus device.
///
/// Every call returns once the transfer completes or fails. Buffers are the
/// fixed benchmark size; `tx` and `rx` always have equal length.
pub trait BusHandle: Send {
    fn write(&mut self, buf: &[u8]) -> Result<(), BusError>;
    fn transfer_full_duplex(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), BusError>;
    fn transfer_sequential(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), BusError>;

    /// Release the device. Called once when the engine shuts down.
    fn close(&mut self) -> Result<(), BusError> {
        Ok(())
    }

    fn describe(&self) -> String {
        "bus".to_string()
    }
}

impl<B: BusHandle + ?Sized> BusHandle for Box<B> {
    fn write(&mut self, buf: &[u8]) -> Result<(), BusError> {
        (**self).write(buf)
    }

    fn transfer_full_duplex(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), BusError> {
        (**self).transfer_full_duplex(tx, rx)
    }

    fn transfer_sequential(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), BusError> {
        (**self).transfer_sequential(tx, rx)
    }

    fn close(&mut self) -> Result<(), BusError> {
        (**self).close()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Run the operation selected by `method` once.
pub fn perform_transfer(
    bus: &mut dyn BusHandle,
    method: TransferMethod,
    tx: &[u8],
    rx: &mut [u8],
) -> Result<(), BusError> {
    match method {
        TransferMethod::Write => bus.write(tx),
        TransferMethod::TransferFullDuplex => bus.transfer_full_duplex(tx, rx),
        TransferMethod::TransferSequential => bus.transfer_sequential(tx, rx),
    }
}

/// Device discovery and connection setup.
///
/// Runs on the engine's initializer thread; may block.
pub trait BusProvider: Send + 'static {
    fn acquire(self) -> Result<Box<dyn BusHandle>, EngineError>;
}

impl<F> BusProvider for F
where
    F: FnOnce() -> Result<Box<dyn BusHandle>, EngineError> + Send + 'static,
{
    fn acquire(self) -> Result<Box<dyn BusHandle>, EngineError> {
        self()
    }
}

/// Provider for hosts without a usable bus.
#[derive(Debug, Clone)]
pub struct UnavailableProvider {
    error: EngineError,
}

impl UnavailableProvider {
    pub fn device_unavailable(reason: impl Into<String>) -> Self {
        Self {
            error: EngineError::DeviceUnavailable(reason.into()),
        }
    }

    pub fn unsupported_platform(reason: impl Into<String>) -> Self {
        Self {
            error: EngineError::UnsupportedPlatform(reason.into()),
        }
    }
}

impl BusProvider for UnavailableProvider {
    fn acquire(self) -> Result<Box<dyn BusHandle>, EngineError> {
        Err(self.error)
    }
}

/// Connection settings handed to hardware providers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusSettings {
    pub device_path: String,
    pub clock_hz: u32,
    pub mode: u8,
    pub bits_per_word: u8,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            device_path: "/dev/spidev0.0".to_string(),
            clock_hz: 30_000_000,
            mode: 0,
            bits_per_word: 8,
        }
    }
}

impl BusSettings {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.mode > 3 {
            return Err(EngineError::InvalidConfig(format!(
                "SPI mode must be 0-3, got {}",
                self.mode
            )));
        }
        if self.clock_hz == 0 {
            return Err(EngineError::InvalidConfig(
                "clock_hz must be non-zero".to_string(),
            ));
        }
        if self.bits_per_word == 0 {
            return Err(EngineError::InvalidConfig(
                "bits_per_word must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
