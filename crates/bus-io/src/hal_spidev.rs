//! Linux `spidev` backend.
//!
//! Discovery scans `/dev` for `spidevB.C` nodes; an empty or `auto` device
//! path picks the first one, like selecting the first SPI0 match.

use bus_core::{BusError, BusHandle, BusProvider, BusSettings, EngineError};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Largest single ioctl message the kernel accepts by default (`spidev.bufsiz`).
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Lists `/dev/spidev*` nodes in name order.
pub fn discover_devices(dev_dir: &Path) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = match std::fs::read_dir(dev_dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with("spidev"))
            })
            .collect(),
        Err(_) => Vec::new(),
    };
    found.sort();
    found
}

/// Both duplex modes move `tx.len()` bytes each way; chunked zips must not
/// silently drop a tail.
#[cfg_attr(not(all(feature = "spidev", target_os = "linux")), allow(dead_code))]
fn check_lengths(tx: &[u8], rx: &[u8]) -> Result<(), BusError> {
    if tx.len() != rx.len() {
        return Err(BusError::BufferMismatch {
            tx: tx.len(),
            rx: rx.len(),
        });
    }
    Ok(())
}

fn resolve_device(settings: &BusSettings, dev_dir: &Path) -> Result<PathBuf, EngineError> {
    let requested = settings.device_path.trim();
    if requested.is_empty() || requested.eq_ignore_ascii_case("auto") {
        return discover_devices(dev_dir).into_iter().next().ok_or_else(|| {
            EngineError::DeviceUnavailable(format!(
                "no spidev nodes under {}",
                dev_dir.display()
            ))
        });
    }
    let path = PathBuf::from(requested);
    if path.exists() {
        Ok(path)
    } else {
        Err(EngineError::DeviceUnavailable(format!(
            "{} does not exist",
            path.display()
        )))
    }
}

/// Opens and configures one spidev node.
#[derive(Debug, Clone)]
pub struct SpidevProvider {
    settings: BusSettings,
    chunk_size: usize,
    dev_dir: PathBuf,
}

impl SpidevProvider {
    pub fn new(settings: BusSettings) -> Self {
        Self {
            settings,
            chunk_size: DEFAULT_CHUNK_SIZE,
            dev_dir: PathBuf::from("/dev"),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(2);
        self
    }

    pub fn with_dev_dir(mut self, dev_dir: impl Into<PathBuf>) -> Self {
        self.dev_dir = dev_dir.into();
        self
    }
}

impl BusProvider for SpidevProvider {
    fn acquire(self) -> Result<Box<dyn BusHandle>, EngineError> {
        self.settings.validate()?;
        let path = resolve_device(&self.settings, &self.dev_dir)?;
        debug!(path = %path.display(), "opening spidev node");
        open(&path, &self.settings, self.chunk_size)
    }
}

#[cfg(all(feature = "spidev", target_os = "linux"))]
fn open(
    path: &Path,
    settings: &BusSettings,
    chunk_size: usize,
) -> Result<Box<dyn BusHandle>, EngineError> {
    let bus = linux::SpidevBus::open(path, settings, chunk_size)?;
    info!(
        path = %path.display(),
        clock_hz = settings.clock_hz,
        mode = settings.mode,
        "spidev bus opened"
    );
    Ok(Box::new(bus))
}

#[cfg(not(all(feature = "spidev", target_os = "linux")))]
fn open(
    path: &Path,
    _settings: &BusSettings,
    _chunk_size: usize,
) -> Result<Box<dyn BusHandle>, EngineError> {
    info!(path = %path.display(), "spidev support not compiled in");
    Err(EngineError::UnsupportedPlatform(
        "built without Linux spidev support".to_string(),
    ))
}

#[cfg(all(feature = "spidev", target_os = "linux"))]
mod linux {
    use super::check_lengths;
    use bus_core::{BusError, BusHandle, BusSettings, EngineError};
    use spidev::{SpiModeFlags, Spidev, SpidevOptions, SpidevTransfer};
    use std::io::{ErrorKind, Write};
    use std::path::{Path, PathBuf};

    pub struct SpidevBus {
        spi: Option<Spidev>,
        path: PathBuf,
        chunk_size: usize,
    }

    fn mode_flags(mode: u8) -> SpiModeFlags {
        match mode {
            1 => SpiModeFlags::SPI_MODE_1,
            2 => SpiModeFlags::SPI_MODE_2,
            3 => SpiModeFlags::SPI_MODE_3,
            _ => SpiModeFlags::SPI_MODE_0,
        }
    }

    impl SpidevBus {
        pub fn open(
            path: &Path,
            settings: &BusSettings,
            chunk_size: usize,
        ) -> Result<Self, EngineError> {
            let unavailable = |e: std::io::Error| {
                EngineError::DeviceUnavailable(format!("{}: {e}", path.display()))
            };
            let mut spi = Spidev::open(path).map_err(unavailable)?;
            let options = SpidevOptions::new()
                .bits_per_word(settings.bits_per_word)
                .max_speed_hz(settings.clock_hz)
                .mode(mode_flags(settings.mode))
                .build();
            spi.configure(&options).map_err(unavailable)?;
            Ok(Self {
                spi: Some(spi),
                path: path.to_path_buf(),
                chunk_size,
            })
        }

        fn spi(&mut self) -> Result<&mut Spidev, BusError> {
            self.spi.as_mut().ok_or_else(|| BusError::Io {
                kind: ErrorKind::NotConnected,
                message: "spidev closed".to_string(),
            })
        }
    }

    impl BusHandle for SpidevBus {
        fn write(&mut self, buf: &[u8]) -> Result<(), BusError> {
            let chunk = self.chunk_size;
            let spi = self.spi()?;
            for part in buf.chunks(chunk) {
                spi.write_all(part)?;
            }
            Ok(())
        }

        fn transfer_full_duplex(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), BusError> {
            check_lengths(tx, rx)?;
            let chunk = self.chunk_size;
            let spi = self.spi()?;
            for (t, r) in tx.chunks(chunk).zip(rx.chunks_mut(chunk)) {
                let mut transfer = SpidevTransfer::read_write(t, r);
                spi.transfer(&mut transfer)?;
            }
            Ok(())
        }

        fn transfer_sequential(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), BusError> {
            check_lengths(tx, rx)?;
            // Both phases share one message, so each gets half the budget.
            let chunk = self.chunk_size / 2;
            let spi = self.spi()?;
            for (t, r) in tx.chunks(chunk).zip(rx.chunks_mut(chunk)) {
                let mut transfers = [SpidevTransfer::write(t), SpidevTransfer::read(r)];
                spi.transfer_multiple(&mut transfers)?;
            }
            Ok(())
        }

        fn close(&mut self) -> Result<(), BusError> {
            self.spi.take();
            Ok(())
        }

        fn describe(&self) -> String {
            format!("spidev {}", self.path.display())
        }
    }
}
