use crate::bus::{perform_transfer, BusHandle};
use crate::cancel::CancellationSignal;
use crate::error::EngineError;
use crate::measurement::{transfer_rate, MeasurementConfig, RunOutcome};
use crate::sink::PublishSink;
use crate::timebase::Clock;
use log::{debug, warn};
use std::thread;

/// Everything one run needs, captured when the run starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunPlan {
    pub config: MeasurementConfig,
    pub buffer_size: usize,
}

/// Drives `plan.config.transfer_count` sequential transfers.
///
/// Publishes one rate per transfer and, only when every transfer ran, the
/// aggregate rate. Stops before the next transfer once `cancel` is set and
/// aborts on the first bus error.
pub fn run_transfers<P>(
    bus: &mut dyn BusHandle,
    plan: &RunPlan,
    cancel: &CancellationSignal,
    clock: &dyn Clock,
    sink: &P,
) -> RunOutcome
where
    P: PublishSink + ?Sized,
{
    let tx: Vec<u8> = (0..plan.buffer_size).map(|i| i as u8).collect();
    let mut rx = vec![0u8; plan.buffer_size];
    let bytes = plan.buffer_size as f64;

    let mut total_elapsed_s = 0.0f64;
    let mut samples = 0u32;

    for iteration in 1..=plan.config.transfer_count {
        if cancel.is_cancelled() {
            debug!("run cancelled after {samples} transfers");
            return RunOutcome::Cancelled { samples };
        }

        let start = clock.now_s();
        let result = perform_transfer(bus, plan.config.method, &tx, &mut rx);
        let elapsed_s = clock.now_s() - start;

        if let Err(source) = result {
            let error = EngineError::TransferFailure { iteration, source };
            warn!("{error}; aborting run");
            sink.report_failure(&error);
            return RunOutcome::Failed { samples, error };
        }

        sink.set_last_rate(transfer_rate(bytes, elapsed_s));
        samples += 1;
        if elapsed_s > 0.0 {
            total_elapsed_s += elapsed_s;
        }

        // The bus call blocks; give the canceller a chance to run.
        thread::yield_now();
    }

    let total_bytes = bytes * f64::from(plan.config.transfer_count);
    let average_rate = transfer_rate(total_bytes, total_elapsed_s);
    sink.set_average_rate(average_rate);
    debug!(
        "run complete: {samples} x {} bytes in {total_elapsed_s:.6}s ({average_rate:.0} B/s)",
        plan.buffer_size
    );

    RunOutcome::Completed {
        samples,
        total_elapsed_s,
        average_rate,
    }
}
