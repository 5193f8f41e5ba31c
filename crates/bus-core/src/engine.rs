use crate::bus::{BusHandle, BusProvider};
use crate::cancel::CancellationSignal;
use crate::error::{EngineError, Result};
use crate::measurement::{EngineStatus, MeasurementConfig, RunOutcome, DEFAULT_BUFFER_SIZE};
use crate::sink::PublishSink;
use crate::sync::{EngineSnapshot, PublishedState};
use crate::timebase::{Clock, TimeBase};
use crate::transfer_loop::{run_transfers, RunPlan};
use log::{debug, info, warn};
use std::mem;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[derive(Clone)]
pub struct EngineOptions {
    /// Size of both the tx and rx buffer, fixed for the engine's lifetime.
    pub buffer_size: usize,
    pub clock: Arc<dyn Clock>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            clock: Arc::new(TimeBase::new()),
        }
    }
}

impl std::fmt::Debug for EngineOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineOptions")
            .field("buffer_size", &self.buffer_size)
            .finish_non_exhaustive()
    }
}

impl EngineOptions {
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

enum DeviceSlot {
    Pending,
    Ready(Box<dyn BusHandle>),
    /// Taken by the active worker.
    InUse,
    Failed(EngineError),
    Released,
}

struct Worker {
    cancel: CancellationSignal,
    handle: JoinHandle<()>,
}

struct Shared<S> {
    sink: S,
    state: PublishedState,
    status_gate: Mutex<()>,
    status_changed: Condvar,
    device: Mutex<DeviceSlot>,
    config: Mutex<MeasurementConfig>,
    active: Mutex<Option<RunPlan>>,
    last_outcome: Mutex<Option<RunOutcome>>,
    last_error: Mutex<Option<EngineError>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<S: PublishSink> Shared<S> {
    /// Waiters wake only after the sink has seen the new status.
    fn publish_status(&self, status: EngineStatus) {
        {
            let _gate = lock(&self.status_gate);
            self.state.set_status(status);
            self.sink.set_status(status);
        }
        self.status_changed.notify_all();
    }

    fn wait_until(&self, timeout: Duration, done: impl Fn(EngineStatus) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut gate = lock(&self.status_gate);
        loop {
            if done(self.state.status()) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            gate = self
                .status_changed
                .wait_timeout(gate, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

/// Rates go to the engine's own atomics first, then to the caller's sink.
impl<S: PublishSink> PublishSink for Shared<S> {
    fn set_last_rate(&self, rate: f64) {
        self.state.publish_sample(rate);
        self.sink.set_last_rate(rate);
    }

    fn set_average_rate(&self, rate: f64) {
        self.state.publish_average(rate);
        self.sink.set_average_rate(rate);
    }

    fn set_status(&self, status: EngineStatus) {
        self.publish_status(status);
    }

    fn report_failure(&self, error: &EngineError) {
        *lock(&self.last_error) = Some(error.clone());
        self.sink.report_failure(error);
    }
}

/// Returns the bus and publishes Idle however the worker exits.
struct RunGuard<S: PublishSink> {
    shared: Arc<Shared<S>>,
    bus: Option<Box<dyn BusHandle>>,
    outcome: Option<RunOutcome>,
}

impl<S: PublishSink> Drop for RunGuard<S> {
    fn drop(&mut self) {
        let outcome = match self.outcome.take() {
            Some(outcome) => outcome,
            None if thread::panicking() => {
                warn!("measurement worker panicked; returning to idle");
                RunOutcome::Failed {
                    samples: 0,
                    error: EngineError::WorkerPanicked,
                }
            }
            // Worker never ran (spawn failed).
            None => RunOutcome::Cancelled { samples: 0 },
        };
        if let Some(bus) = self.bus.take() {
            *lock(&self.shared.device) = DeviceSlot::Ready(bus);
        }
        *lock(&self.shared.active) = None;
        *lock(&self.shared.last_outcome) = Some(outcome);
        self.shared.publish_status(EngineStatus::Idle);
    }
}

/// Publishes Idle once acquisition finishes, even if the provider panics.
struct InitGuard<S: PublishSink> {
    shared: Arc<Shared<S>>,
}

impl<S: PublishSink> Drop for InitGuard<S> {
    fn drop(&mut self) {
        {
            let mut slot = lock(&self.shared.device);
            if matches!(*slot, DeviceSlot::Pending) {
                *slot = DeviceSlot::Failed(EngineError::DeviceUnavailable(
                    "device acquisition aborted".to_string(),
                ));
            }
        }
        self.shared.publish_status(EngineStatus::Idle);
    }
}

/// Stateful throughput benchmark over one bus device.
///
/// `Initializing -> Idle` once acquisition finishes, then
/// `Idle -> Running -> Idle` per run. At most one worker exists at a time.
pub struct MeasurementEngine<S: PublishSink + 'static = ()> {
    shared: Arc<Shared<S>>,
    buffer_size: usize,
    clock: Arc<dyn Clock>,
    init: Mutex<Option<JoinHandle<()>>>,
    worker: Mutex<Option<Worker>>,
}

impl<S: PublishSink + 'static> MeasurementEngine<S> {
    /// Builds the engine and starts acquiring the bus in the background.
    pub fn new<P: BusProvider>(provider: P, sink: S, options: EngineOptions) -> Result<Self> {
        if options.buffer_size == 0 {
            return Err(EngineError::InvalidConfig(
                "buffer_size must be non-zero".to_string(),
            ));
        }

        let shared = Arc::new(Shared {
            sink,
            state: PublishedState::new(),
            status_gate: Mutex::new(()),
            status_changed: Condvar::new(),
            device: Mutex::new(DeviceSlot::Pending),
            config: Mutex::new(MeasurementConfig::default()),
            active: Mutex::new(None),
            last_outcome: Mutex::new(None),
            last_error: Mutex::new(None),
        });
        shared.sink.set_status(EngineStatus::Initializing);

        let engine = Self {
            shared,
            buffer_size: options.buffer_size,
            clock: options.clock,
            init: Mutex::new(None),
            worker: Mutex::new(None),
        };
        engine.initialize(provider)?;
        Ok(engine)
    }

    fn initialize<P: BusProvider>(&self, provider: P) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("bus-init".to_string())
            .spawn(move || {
                let guard = InitGuard { shared };
                let slot = match provider.acquire() {
                    Ok(bus) => {
                        info!("bus acquired: {}", bus.describe());
                        DeviceSlot::Ready(bus)
                    }
                    Err(err) => {
                        warn!("bus acquisition failed: {err}");
                        DeviceSlot::Failed(err)
                    }
                };
                *lock(&guard.shared.device) = slot;
            })
            .map_err(|e| EngineError::Spawn(e.to_string()))?;
        *lock(&self.init) = Some(handle);
        Ok(())
    }

    pub fn status(&self) -> EngineStatus {
        self.shared.state.status()
    }

    pub fn last_rate(&self) -> f64 {
        self.shared.state.last_rate()
    }

    pub fn average_rate(&self) -> f64 {
        self.shared.state.average_rate()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        self.shared.state.snapshot()
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn sink(&self) -> &S {
        &self.shared.sink
    }

    /// Stored settings used by [`start_configured`](Self::start_configured).
    pub fn config(&self) -> MeasurementConfig {
        *lock(&self.shared.config)
    }

    /// Settings of the run in progress, if any.
    pub fn active_plan(&self) -> Option<RunPlan> {
        *lock(&self.shared.active)
    }

    pub fn last_outcome(&self) -> Option<RunOutcome> {
        lock(&self.shared.last_outcome).clone()
    }

    /// Most recent transfer failure; cleared when a new run starts.
    pub fn last_error(&self) -> Option<EngineError> {
        lock(&self.shared.last_error).clone()
    }

    /// Acquisition error recorded by `initialize`, if the bus never came up.
    pub fn device_error(&self) -> Option<EngineError> {
        match &*lock(&self.shared.device) {
            DeviceSlot::Failed(err) => Some(err.clone()),
            _ => None,
        }
    }

    /// Replace the stored settings. Only allowed while Idle.
    pub fn configure(&self, config: MeasurementConfig) -> Result<()> {
        config.validate()?;
        let _control = lock(&self.worker);
        self.require(EngineStatus::Idle)?;
        *lock(&self.shared.config) = config;
        Ok(())
    }

    pub fn start_configured(&self) -> Result<()> {
        self.start(self.config())
    }

    /// Begin a run and return without waiting for it.
    pub fn start(&self, config: MeasurementConfig) -> Result<()> {
        config.validate()?;
        let mut worker = lock(&self.worker);
        self.require(EngineStatus::Idle)?;

        let bus = {
            let mut slot = lock(&self.shared.device);
            match mem::replace(&mut *slot, DeviceSlot::InUse) {
                DeviceSlot::Ready(bus) => bus,
                // The root cause stays available through `device_error`.
                DeviceSlot::Failed(err) => {
                    let reported = match &err {
                        EngineError::DeviceUnavailable(_) => err.clone(),
                        other => EngineError::DeviceUnavailable(other.to_string()),
                    };
                    *slot = DeviceSlot::Failed(err);
                    return Err(reported);
                }
                DeviceSlot::Released => {
                    *slot = DeviceSlot::Released;
                    return Err(EngineError::DeviceUnavailable(
                        "bus released by shutdown".to_string(),
                    ));
                }
                other => {
                    *slot = other;
                    return Err(EngineError::InvalidState {
                        expected: EngineStatus::Idle,
                        actual: self.status(),
                    });
                }
            }
        };

        if let Err(actual) = self
            .shared
            .state
            .transition(EngineStatus::Idle, EngineStatus::Running)
        {
            *lock(&self.shared.device) = DeviceSlot::Ready(bus);
            return Err(EngineError::InvalidState {
                expected: EngineStatus::Idle,
                actual,
            });
        }

        // The previous worker has already published Idle; reap it.
        if let Some(previous) = worker.take() {
            if previous.handle.join().is_err() {
                warn!("previous measurement worker panicked");
            }
        }

        let plan = RunPlan {
            config,
            buffer_size: self.buffer_size,
        };
        *lock(&self.shared.config) = config;
        *lock(&self.shared.active) = Some(plan);
        *lock(&self.shared.last_error) = None;
        self.shared.sink.set_status(EngineStatus::Running);

        let cancel = CancellationSignal::new();
        let mut guard = RunGuard {
            shared: Arc::clone(&self.shared),
            bus: Some(bus),
            outcome: None,
        };
        let worker_cancel = cancel.clone();
        let clock = Arc::clone(&self.clock);

        info!(
            "starting run: {} x {} bytes via {}",
            plan.config.transfer_count, plan.buffer_size, plan.config.method
        );

        let spawned = thread::Builder::new()
            .name("bus-worker".to_string())
            .spawn(move || {
                let shared = Arc::clone(&guard.shared);
                if let Some(bus) = guard.bus.as_deref_mut() {
                    let outcome =
                        run_transfers(bus, &plan, &worker_cancel, clock.as_ref(), shared.as_ref());
                    guard.outcome = Some(outcome);
                }
            });

        match spawned {
            Ok(handle) => {
                *worker = Some(Worker { cancel, handle });
                Ok(())
            }
            // The closure (and its guard) was dropped, so the bus is back
            // and the engine is Idle again.
            Err(e) => Err(EngineError::Spawn(e.to_string())),
        }
    }

    /// Cancel the active run, if any, and wait for the worker to exit.
    pub fn stop(&self) {
        let mut worker = lock(&self.worker);
        if let Some(active) = worker.take() {
            if active.cancel.cancel() {
                debug!("cancellation requested");
            }
            if active.handle.join().is_err() {
                warn!("measurement worker panicked");
            }
        }
    }

    /// Block until initialization has finished. Returns false on timeout.
    pub fn wait_ready(&self, timeout: Duration) -> bool {
        self.shared
            .wait_until(timeout, |s| s != EngineStatus::Initializing)
    }

    /// Block until no run is active. Returns false on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.shared.wait_until(timeout, |s| s == EngineStatus::Idle)
    }

    /// Join initialization, stop any run and release the bus.
    ///
    /// Every step runs even if an earlier one failed; the first error is
    /// returned. Safe to call more than once.
    pub fn shutdown(&self) -> Result<()> {
        let mut first_error: Option<EngineError> = None;

        if let Some(init) = lock(&self.init).take() {
            if init.join().is_err() {
                warn!("bus initialization thread panicked");
                first_error.get_or_insert(EngineError::WorkerPanicked);
            }
        }

        self.stop();

        let slot = mem::replace(&mut *lock(&self.shared.device), DeviceSlot::Released);
        if let DeviceSlot::Ready(mut bus) = slot {
            match bus.close() {
                Ok(()) => info!("bus released: {}", bus.describe()),
                Err(err) => {
                    warn!("failed to release bus: {err}");
                    first_error.get_or_insert(EngineError::Release(err));
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn require(&self, expected: EngineStatus) -> Result<()> {
        let actual = self.status();
        if actual == expected {
            Ok(())
        } else {
            Err(EngineError::InvalidState { expected, actual })
        }
    }
}

impl<S: PublishSink + 'static> Drop for MeasurementEngine<S> {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!("engine shutdown reported: {err}");
        }
    }
}
