//! Metric names and help strings shared by every exporter.

#[derive(Debug, Clone, Copy)]
pub struct Tag {
    pub metric: &'static str,
    pub help: &'static str,
}

pub const LAST_RATE: Tag = Tag {
    metric: "busbench_last_rate_bytes_per_second",
    help: "Throughput of the most recent transfer in bytes per second",
};

pub const AVERAGE_RATE: Tag = Tag {
    metric: "busbench_average_rate_bytes_per_second",
    help: "Aggregate throughput of the last completed run in bytes per second",
};

pub const ENGINE_STATUS: Tag = Tag {
    metric: "busbench_engine_status",
    help: "Engine status (0=initializing,1=idle,2=running)",
};

pub const TRANSFERS: Tag = Tag {
    metric: "busbench_transfers_total",
    help: "Transfers completed since start",
};

pub const TRANSFER_FAILURES: Tag = Tag {
    metric: "busbench_transfer_failures_total",
    help: "Runs aborted by a bus transfer failure",
};

pub const RATE_DISTRIBUTION: Tag = Tag {
    metric: "busbench_rate_bytes_per_second",
    help: "Distribution of per-transfer throughput in bytes per second",
};
