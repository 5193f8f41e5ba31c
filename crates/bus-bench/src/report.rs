//! Final run summary printed by the CLI.

use bus_core::{RunOutcome, TransferMethod};
use serde::Serialize;
use std::fmt::Write as _;

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub device: String,
    pub method: TransferMethod,
    pub transfer_count: u32,
    pub buffer_size: usize,
    pub outcome: &'static str,
    pub samples: u32,
    pub last_rate_bps: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_rate_bps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_elapsed_s: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunReport {
    pub fn new(
        device: String,
        method: TransferMethod,
        transfer_count: u32,
        buffer_size: usize,
        outcome: &RunOutcome,
        last_rate_bps: f64,
    ) -> Self {
        let total_elapsed_s = match outcome {
            RunOutcome::Completed {
                total_elapsed_s, ..
            } => Some(*total_elapsed_s),
            _ => None,
        };
        Self {
            device,
            method,
            transfer_count,
            buffer_size,
            outcome: outcome.label(),
            samples: outcome.samples(),
            last_rate_bps,
            average_rate_bps: outcome.average_rate(),
            total_elapsed_s,
            error: outcome.error().map(|e| e.to_string()),
        }
    }

    /// Completed and cancelled runs both count as success.
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "device:      {}", self.device);
        let _ = writeln!(out, "method:      {}", self.method);
        let _ = writeln!(
            out,
            "transfers:   {}/{} x {} bytes",
            self.samples, self.transfer_count, self.buffer_size
        );
        let _ = writeln!(out, "outcome:     {}", self.outcome);
        let _ = writeln!(out, "last rate:   {}", format_rate(self.last_rate_bps));
        if let Some(average) = self.average_rate_bps {
            let _ = writeln!(out, "average:     {}", format_rate(average));
        }
        if let Some(elapsed) = self.total_elapsed_s {
            let _ = writeln!(out, "bus time:    {elapsed:.6} s");
        }
        if let Some(error) = &self.error {
            let _ = writeln!(out, "error:       {error}");
        }
        out
    }
}

/// Human-readable byte rate, decimal units.
pub fn format_rate(bps: f64) -> String {
    const UNITS: [&str; 4] = ["B/s", "kB/s", "MB/s", "GB/s"];
    let mut value = bps;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}
