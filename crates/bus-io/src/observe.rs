use bus_core::{EngineError, EngineStatus, PublishSink};
use tracing::{debug, info, trace, warn};

/// Publish sink that turns engine output into tracing events.
///
/// Per-transfer samples go out at `trace` so they cost nothing unless
/// explicitly enabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl PublishSink for LogSink {
    fn set_last_rate(&self, rate: f64) {
        trace!(rate_bps = rate, "transfer sample");
    }

    fn set_average_rate(&self, rate: f64) {
        info!(average_bps = rate, "run average");
    }

    fn set_status(&self, status: EngineStatus) {
        debug!(?status, "engine status");
    }

    fn report_failure(&self, error: &EngineError) {
        warn!(error = %error, "run aborted");
    }
}
