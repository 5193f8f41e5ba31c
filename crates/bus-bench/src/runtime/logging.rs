use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the tracing subscriber with optional JSON output.
///
/// Console logs go to stderr so stdout stays free for the report. When a log
/// file is given, the returned guard must be held until exit to flush it.
pub fn init_tracing(
    json_output: bool,
    log_file: Option<&Path>,
) -> io::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,bus_bench=debug,bus_core=debug"));

    let (file_writer, guard) = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let (json_layer, pretty_layer) = if json_output {
        (Some(fmt::layer().json().with_writer(io::stderr)), None)
    } else {
        (None, Some(fmt::layer().pretty().with_writer(io::stderr)))
    };
    let file_layer = file_writer.map(|writer| {
        fmt::layer()
            .json()
            .with_ansi(false)
            .with_writer(writer)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(pretty_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}
