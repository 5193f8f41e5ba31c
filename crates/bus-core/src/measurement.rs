use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Transfer buffer size used when none is configured.
pub const DEFAULT_BUFFER_SIZE: usize = 65_536;

pub const DEFAULT_TRANSFER_COUNT: u32 = 1_000;

/// Which bus operation the transfer loop drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TransferMethod {
    #[serde(rename = "write")]
    Write,
    #[default]
    #[serde(rename = "full-duplex")]
    TransferFullDuplex,
    #[serde(rename = "sequential")]
    TransferSequential,
}

impl TransferMethod {
    pub const ALL: [TransferMethod; 3] = [
        TransferMethod::Write,
        TransferMethod::TransferFullDuplex,
        TransferMethod::TransferSequential,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferMethod::Write => "write",
            TransferMethod::TransferFullDuplex => "full-duplex",
            TransferMethod::TransferSequential => "sequential",
        }
    }
}

impl fmt::Display for TransferMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferMethod {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "write" => Ok(TransferMethod::Write),
            "full-duplex" | "fullduplex" | "duplex" => Ok(TransferMethod::TransferFullDuplex),
            "sequential" | "seq" => Ok(TransferMethod::TransferSequential),
            other => Err(EngineError::InvalidConfig(format!(
                "unknown transfer method '{other}' (expected write|full-duplex|sequential)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    #[default]
    Initializing,
    Idle,
    Running,
}

impl EngineStatus {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            EngineStatus::Initializing => 0,
            EngineStatus::Idle => 1,
            EngineStatus::Running => 2,
        }
    }

    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            1 => EngineStatus::Idle,
            2 => EngineStatus::Running,
            _ => EngineStatus::Initializing,
        }
    }
}

/// Settings for one measurement run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementConfig {
    pub transfer_count: u32,
    pub method: TransferMethod,
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            transfer_count: DEFAULT_TRANSFER_COUNT,
            method: TransferMethod::default(),
        }
    }
}

impl MeasurementConfig {
    pub fn new(transfer_count: u32, method: TransferMethod) -> Self {
        Self {
            transfer_count,
            method,
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.transfer_count == 0 {
            return Err(EngineError::InvalidConfig(
                "transfer_count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed {
        samples: u32,
        total_elapsed_s: f64,
        average_rate: f64,
    },
    Cancelled {
        samples: u32,
    },
    Failed {
        samples: u32,
        error: EngineError,
    },
}

impl RunOutcome {
    pub fn samples(&self) -> u32 {
        match self {
            RunOutcome::Completed { samples, .. }
            | RunOutcome::Cancelled { samples }
            | RunOutcome::Failed { samples, .. } => *samples,
        }
    }

    pub fn average_rate(&self) -> Option<f64> {
        match self {
            RunOutcome::Completed { average_rate, .. } => Some(*average_rate),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&EngineError> {
        match self {
            RunOutcome::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Completed { .. } => "completed",
            RunOutcome::Cancelled { .. } => "cancelled",
            RunOutcome::Failed { .. } => "failed",
        }
    }
}

/// Bytes per second for `bytes` moved in `elapsed_s` seconds.
///
/// Zero, negative or non-finite durations yield 0 rather than inf/NaN.
pub fn transfer_rate(bytes: f64, elapsed_s: f64) -> f64 {
    if elapsed_s.is_nan() || elapsed_s <= 0.0 || !bytes.is_finite() {
        return 0.0;
    }
    let rate = bytes / elapsed_s;
    if rate.is_finite() {
        rate
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_round_trips_through_str() {
        for method in TransferMethod::ALL {
            assert_eq!(method.as_str().parse::<TransferMethod>().unwrap(), method);
        }
        assert!("burst".parse::<TransferMethod>().is_err());
    }

    #[test]
    fn method_serializes_like_display() {
        let json = serde_json::to_string(&TransferMethod::TransferSequential).unwrap();
        assert_eq!(json, "\"sequential\"");
    }

    #[test]
    fn zero_transfer_count_rejected() {
        let err = MeasurementConfig::new(0, TransferMethod::Write)
            .validate()
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));
        assert!(MeasurementConfig::new(1, TransferMethod::Write).validate().is_ok());
    }

    #[test]
    fn status_u8_mapping() {
        for status in [
            EngineStatus::Initializing,
            EngineStatus::Idle,
            EngineStatus::Running,
        ] {
            assert_eq!(EngineStatus::from_u8(status.to_u8()), status);
        }
    }

    #[test]
    fn rate_guards_degenerate_durations() {
        assert_eq!(transfer_rate(1024.0, 0.0), 0.0);
        assert_eq!(transfer_rate(1024.0, -0.5), 0.0);
        assert_eq!(transfer_rate(1024.0, f64::NAN), 0.0);
        assert!((transfer_rate(1024.0, 0.01) - 102_400.0).abs() < 1e-6);
    }
}
