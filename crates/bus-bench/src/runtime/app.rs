use crate::report::{format_rate, RunReport};
use crate::runtime::config::RuntimeConfig;
use crate::runtime::logging::init_tracing;
use crate::runtime::telemetry;
use bus_core::{
    BusHandle, BusProvider, ChannelSink, EngineError, EngineEvent, EngineStatus,
    MeasurementEngine, PublishSink, RateWindow, SimulatedBus, SimulatedProvider,
};
use bus_io::{LogSink, MetricsError, MetricsSink, SpidevProvider};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Upper bound on device discovery before giving up.
const INIT_TIMEOUT: Duration = Duration::from_secs(10);

const EVENT_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("failed to open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Metrics(#[from] MetricsError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("bus initialization did not finish within {0:?}")]
    InitTimeout(Duration),

    #[error("engine returned to idle without a run outcome")]
    MissingOutcome,

    #[error("failed to encode report: {0}")]
    Report(#[from] serde_json::Error),
}

enum BenchProvider {
    Simulated(SimulatedProvider),
    Spidev(SpidevProvider),
}

impl BusProvider for BenchProvider {
    fn acquire(self) -> Result<Box<dyn BusHandle>, EngineError> {
        match self {
            Self::Simulated(p) => p.acquire(),
            Self::Spidev(p) => p.acquire(),
        }
    }
}

fn build_provider(config: &RuntimeConfig) -> BenchProvider {
    if config.simulate {
        // Loopback paced like the configured clock, one byte per eight cycles.
        let mut bus = SimulatedBus::new()
            .with_throughput(f64::from(config.bus.clock_hz) / 8.0)
            .with_delay(Duration::from_micros(config.sim_delay_us));
        if let Some(n) = config.sim_fail_at {
            bus = bus.fail_at(n);
        }
        info!(
            clock_hz = config.bus.clock_hz,
            delay_us = config.sim_delay_us,
            "Using simulated bus"
        );
        BenchProvider::Simulated(SimulatedProvider::new(bus))
    } else {
        info!(device = %config.bus.device_path, "Using spidev bus");
        BenchProvider::Spidev(SpidevProvider::new(config.bus.clone()))
    }
}

pub fn run_from_args() -> ExitCode {
    let config = match RuntimeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            eprintln!("Run with --help for usage.");
            return ExitCode::from(2);
        }
    };
    if config.show_help {
        RuntimeConfig::print_help();
        return ExitCode::SUCCESS;
    }
    match run(config) {
        Ok(report) if report.succeeded() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %e, "bus-bench failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

pub fn run(config: RuntimeConfig) -> Result<RunReport, AppError> {
    // Initialize tracing
    let _log_guard =
        init_tracing(config.json_logs, config.log_file.as_deref()).map_err(|source| {
            AppError::LogFile {
                path: config.log_file.clone().unwrap_or_default(),
                source,
            }
        })?;

    // Initialize metrics
    telemetry::init();
    let _metrics_handle = telemetry::start_metrics_server(&config.metrics_addr)?;

    let (channel, events) = ChannelSink::new();
    let engine = MeasurementEngine::new(
        build_provider(&config),
        (MetricsSink, (LogSink, channel)),
        config.engine_options(),
    )?;

    if !engine.wait_ready(INIT_TIMEOUT) {
        return Err(AppError::InitTimeout(INIT_TIMEOUT));
    }
    // Drop the Initializing/Idle pair so the loop below only sees this run.
    while events.try_recv().is_ok() {}

    let measurement = config.measurement_config();
    info!(
        method = %measurement.method,
        count = measurement.transfer_count,
        buffer_size = engine.buffer_size(),
        "Starting measurement run"
    );
    engine.start(measurement)?;

    present(&engine, &events, &config);

    let outcome = engine.last_outcome().ok_or(AppError::MissingOutcome)?;
    let report = RunReport::new(
        device_label(&config),
        measurement.method,
        measurement.transfer_count,
        engine.buffer_size(),
        &outcome,
        engine.last_rate(),
    );

    if let Err(e) = engine.shutdown() {
        warn!(error = %e, "Bus did not shut down cleanly");
    }

    info!(
        outcome = report.outcome,
        samples = report.samples,
        average_bps = report.average_rate_bps.unwrap_or(0.0),
        "Run complete"
    );

    if config.json_report {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.render_text());
    }
    Ok(report)
}

fn device_label(config: &RuntimeConfig) -> String {
    if config.simulate {
        "simulated".to_string()
    } else {
        config.bus.device_path.clone()
    }
}

/// A deadline too far out to represent means the run is never cut short.
fn run_deadline(started: Instant, secs: u64) -> Option<Instant> {
    started.checked_add(Duration::from_secs(secs))
}

/// Prints windowed rates until the engine reports Idle again, stopping the
/// run once the optional deadline passes.
fn present<S: PublishSink + 'static>(
    engine: &MeasurementEngine<S>,
    events: &Receiver<EngineEvent>,
    config: &RuntimeConfig,
) {
    let started = Instant::now();
    let deadline = config
        .run_seconds
        .and_then(|secs| run_deadline(started, secs));
    let mut window = RateWindow::new(config.report_interval, started);
    let mut stop_requested = false;

    loop {
        match events.recv_timeout(EVENT_POLL) {
            Ok(EngineEvent::LastRate(rate)) => window.push(rate),
            Ok(EngineEvent::Status(EngineStatus::Idle)) => break,
            Ok(_) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        let now = Instant::now();
        if let Some((mean, samples)) = window.poll(now) {
            info!(rate_bps = mean, samples, "Windowed rate");
            if !config.json_report {
                println!("{:>14}  ({samples} transfers)", format_rate(mean));
            }
        }

        if !stop_requested && deadline.is_some_and(|d| now >= d) {
            info!("Run deadline reached, stopping");
            engine.stop();
            stop_requested = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_is_offset_from_start() {
        let started = Instant::now();
        assert_eq!(
            run_deadline(started, 3),
            Some(started + Duration::from_secs(3))
        );
        assert_eq!(run_deadline(started, 0), Some(started));
    }

    #[test]
    fn unrepresentable_deadline_means_no_deadline() {
        assert_eq!(run_deadline(Instant::now(), u64::MAX), None);
    }
}
