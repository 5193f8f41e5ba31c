pub mod hal_spidev;
pub mod metrics;
pub mod observe;

pub use hal_spidev::{discover_devices, SpidevProvider};
pub use metrics::{init_metrics, serve_metrics, MetricsError, MetricsSink};
pub use observe::LogSink;
