//! Prometheus metrics for bus throughput runs.
//!
//! [`MetricsSink`] feeds the gauges from the engine's publish calls; the
//! optional HTTP endpoint exposes them for scraping.

use bus_core::{tags, EngineError, EngineStatus, PublishSink};
use prometheus::{Encoder, Gauge, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};
use std::sync::LazyLock;
use std::thread;
use tiny_http::{Response, Server};

/// Global metrics registry
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// ============================================================================
// Throughput Metrics
// ============================================================================

/// Rate of the most recent transfer
pub static LAST_RATE: LazyLock<Gauge> = LazyLock::new(|| {
    let gauge = Gauge::new(tags::LAST_RATE.metric, tags::LAST_RATE.help).unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

/// Aggregate rate of the last completed run
pub static AVERAGE_RATE: LazyLock<Gauge> = LazyLock::new(|| {
    let gauge = Gauge::new(tags::AVERAGE_RATE.metric, tags::AVERAGE_RATE.help).unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

/// Per-transfer rate distribution, 1 KiB/s .. 1 GiB/s
pub static RATE_DISTRIBUTION: LazyLock<Histogram> = LazyLock::new(|| {
    let histogram = Histogram::with_opts(
        HistogramOpts::new(tags::RATE_DISTRIBUTION.metric, tags::RATE_DISTRIBUTION.help)
            .buckets(prometheus::exponential_buckets(1024.0, 4.0, 11).unwrap()),
    )
    .unwrap();
    REGISTRY.register(Box::new(histogram.clone())).unwrap();
    histogram
});

/// Transfers completed
pub static TRANSFERS: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(tags::TRANSFERS.metric, tags::TRANSFERS.help).unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Runs aborted by a bus error
pub static TRANSFER_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter =
        IntCounter::new(tags::TRANSFER_FAILURES.metric, tags::TRANSFER_FAILURES.help).unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

// ============================================================================
// Engine State Metrics
// ============================================================================

/// Engine status (0=initializing,1=idle,2=running)
pub static ENGINE_STATUS: LazyLock<Gauge> = LazyLock::new(|| {
    let gauge = Gauge::new(tags::ENGINE_STATUS.metric, tags::ENGINE_STATUS.help).unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

pub fn status_value(status: EngineStatus) -> f64 {
    match status {
        EngineStatus::Initializing => 0.0,
        EngineStatus::Idle => 1.0,
        EngineStatus::Running => 2.0,
    }
}

/// Publish sink that mirrors engine output into the global registry.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsSink;

impl PublishSink for MetricsSink {
    fn set_last_rate(&self, rate: f64) {
        LAST_RATE.set(rate);
        RATE_DISTRIBUTION.observe(rate);
        TRANSFERS.inc();
    }

    fn set_average_rate(&self, rate: f64) {
        AVERAGE_RATE.set(rate);
    }

    fn set_status(&self, status: EngineStatus) {
        ENGINE_STATUS.set(status_value(status));
    }

    fn report_failure(&self, _error: &EngineError) {
        TRANSFER_FAILURES.inc();
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("failed to bind metrics server on {addr}: {reason}")]
    Bind { addr: String, reason: String },

    #[error("failed to spawn metrics thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Render the registry in the Prometheus text format.
pub fn render() -> Result<Vec<u8>, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(buffer)
}

// ============================================================================
// Metrics HTTP Server
// ============================================================================

/// Start the metrics HTTP server on the given address.
///
/// Binds before returning so address errors surface to the caller.
/// Serves `/metrics`, `/health` and `/ready` (ready once the engine has
/// left initialization).
pub fn serve_metrics(bind_addr: String) -> Result<thread::JoinHandle<()>, MetricsError> {
    let server = Server::http(&bind_addr).map_err(|e| MetricsError::Bind {
        addr: bind_addr.clone(),
        reason: e.to_string(),
    })?;

    tracing::info!("Metrics server listening on http://{}/metrics", bind_addr);

    let handle = thread::Builder::new()
        .name("metrics-http".to_string())
        .spawn(move || {
            for request in server.incoming_requests() {
                match request.url() {
                    "/metrics" => {
                        let buffer = match render() {
                            Ok(buffer) => buffer,
                            Err(e) => {
                                tracing::warn!("Failed to encode metrics: {}", e);
                                let _ = request.respond(
                                    Response::from_string("Internal Server Error")
                                        .with_status_code(500),
                                );
                                continue;
                            }
                        };

                        let mut response = Response::from_data(buffer);
                        if let Ok(header) = tiny_http::Header::from_bytes(
                            &b"Content-Type"[..],
                            &b"text/plain; version=0.0.4"[..],
                        ) {
                            response = response.with_header(header);
                        }
                        let _ = request.respond(response);
                    }
                    "/health" => {
                        let _ = request.respond(Response::from_string("OK"));
                    }
                    "/ready" => {
                        if ENGINE_STATUS.get() > 0.0 {
                            let _ = request.respond(Response::from_string("Ready"));
                        } else {
                            let _ = request.respond(
                                Response::from_string("Not Ready").with_status_code(503),
                            );
                        }
                    }
                    _ => {
                        let _ = request
                            .respond(Response::from_string("Not Found").with_status_code(404));
                    }
                }
            }
        })?;
    Ok(handle)
}

/// Initialize all metrics (forces lazy initialization)
pub fn init_metrics() {
    let _ = LAST_RATE.get();
    let _ = AVERAGE_RATE.get();
    let _ = RATE_DISTRIBUTION.get_sample_count();
    let _ = TRANSFERS.get();
    let _ = TRANSFER_FAILURES.get();
    let _ = ENGINE_STATUS.get();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_updates_gauges() {
        init_metrics();
        let before = TRANSFERS.get();
        let sink = MetricsSink;
        sink.set_last_rate(2048.0);
        sink.set_average_rate(1024.0);
        sink.set_status(EngineStatus::Running);

        assert!(TRANSFERS.get() > before);
        assert!(RATE_DISTRIBUTION.get_sample_count() >= 1);
    }

    #[test]
    fn failure_counts() {
        let before = TRANSFER_FAILURES.get();
        MetricsSink.report_failure(&EngineError::WorkerPanicked);
        assert!(TRANSFER_FAILURES.get() > before);
    }

    #[test]
    fn render_contains_all_metric_names() {
        init_metrics();
        let text = String::from_utf8(render().unwrap()).unwrap();
        for tag in [
            tags::LAST_RATE,
            tags::AVERAGE_RATE,
            tags::ENGINE_STATUS,
            tags::TRANSFERS,
            tags::TRANSFER_FAILURES,
            tags::RATE_DISTRIBUTION,
        ] {
            assert!(text.contains(tag.metric), "missing {}", tag.metric);
        }
    }

    #[test]
    fn status_values_are_distinct() {
        assert_eq!(status_value(EngineStatus::Initializing), 0.0);
        assert_eq!(status_value(EngineStatus::Idle), 1.0);
        assert_eq!(status_value(EngineStatus::Running), 2.0);
    }

    #[test]
    fn bind_error_is_reported() {
        let err = serve_metrics("not-an-address".to_string()).unwrap_err();
        assert!(matches!(err, MetricsError::Bind { .. }));
    }
}
