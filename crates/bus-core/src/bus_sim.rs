use crate::bus::{BusHandle, BusProvider};
use crate::error::{BusError, EngineError};
use crate::timebase::ManualClock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Call counters readable while the bus is owned by an engine.
#[derive(Debug, Default)]
pub struct BusCounters {
    pub writes: AtomicU64,
    pub full_duplex: AtomicU64,
    pub sequential: AtomicU64,
    pub bytes_out: AtomicU64,
    pub bytes_in: AtomicU64,
    pub closed: AtomicBool,
}

impl BusCounters {
    pub fn calls(&self) -> u64 {
        self.writes.load(Ordering::Acquire)
            + self.full_duplex.load(Ordering::Acquire)
            + self.sequential.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Loopback bus with deterministic timing.
///
/// Each call takes `delays[n % delays.len()]` plus `bytes / bytes_per_second`.
/// With a virtual clock attached the time is added to that clock instead of
/// slept, so tests get exact durations.
#[derive(Debug)]
pub struct SimulatedBus {
    delays: Vec<Duration>,
    bytes_per_second: Option<f64>,
    fail_at: Option<u64>,
    fail_on_close: bool,
    virtual_clock: Option<Arc<ManualClock>>,
    counters: Arc<BusCounters>,
    calls: u64,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self {
            delays: vec![Duration::ZERO],
            bytes_per_second: None,
            fail_at: None,
            fail_on_close: false,
            virtual_clock: None,
            counters: Arc::new(BusCounters::default()),
            calls: 0,
        }
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        self.with_delays(vec![delay])
    }

    /// Per-call delays, cycled. An empty list means no delay.
    pub fn with_delays(mut self, delays: Vec<Duration>) -> Self {
        self.delays = if delays.is_empty() {
            vec![Duration::ZERO]
        } else {
            delays
        };
        self
    }

    /// Model a finite link speed on top of the fixed delay.
    pub fn with_throughput(mut self, bytes_per_second: f64) -> Self {
        self.bytes_per_second = (bytes_per_second > 0.0).then_some(bytes_per_second);
        self
    }

    /// Fail the `n`th call (1-based) with a hardware error.
    pub fn fail_at(mut self, n: u64) -> Self {
        self.fail_at = Some(n);
        self
    }

    pub fn fail_on_close(mut self) -> Self {
        self.fail_on_close = true;
        self
    }

    pub fn with_virtual_clock(mut self, clock: Arc<ManualClock>) -> Self {
        self.virtual_clock = Some(clock);
        self
    }

    pub fn counters(&self) -> Arc<BusCounters> {
        Arc::clone(&self.counters)
    }

    fn begin(&mut self, bytes: usize) -> Result<(), BusError> {
        if self.counters.is_closed() {
            return Err(BusError::Hardware("bus closed".to_string()));
        }
        let index = self.calls;
        self.calls += 1;
        if self.fail_at == Some(self.calls) {
            return Err(BusError::Hardware(format!(
                "simulated fault on call {}",
                self.calls
            )));
        }

        let mut delay = self.delays[(index as usize) % self.delays.len()];
        if let Some(bps) = self.bytes_per_second {
            delay += Duration::from_secs_f64(bytes as f64 / bps);
        }
        match &self.virtual_clock {
            Some(clock) => clock.advance(delay),
            None if !delay.is_zero() => thread::sleep(delay),
            None => {}
        }
        Ok(())
    }
}

impl Default for SimulatedBus {
    fn default() -> Self {
        Self::new()
    }
}

impl BusHandle for SimulatedBus {
    fn write(&mut self, buf: &[u8]) -> Result<(), BusError> {
        self.begin(buf.len())?;
        self.counters.writes.fetch_add(1, Ordering::AcqRel);
        self.counters
            .bytes_out
            .fetch_add(buf.len() as u64, Ordering::AcqRel);
        Ok(())
    }

    fn transfer_full_duplex(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), BusError> {
        if tx.len() != rx.len() {
            return Err(BusError::BufferMismatch {
                tx: tx.len(),
                rx: rx.len(),
            });
        }
        self.begin(tx.len())?;
        rx.copy_from_slice(tx);
        self.counters.full_duplex.fetch_add(1, Ordering::AcqRel);
        self.counters
            .bytes_out
            .fetch_add(tx.len() as u64, Ordering::AcqRel);
        self.counters
            .bytes_in
            .fetch_add(rx.len() as u64, Ordering::AcqRel);
        Ok(())
    }

    fn transfer_sequential(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), BusError> {
        // Write phase then read phase; the loopback reads back what was sent.
        self.begin(tx.len() + rx.len())?;
        let n = tx.len().min(rx.len());
        rx[..n].copy_from_slice(&tx[..n]);
        rx[n..].fill(0xFF);
        self.counters.sequential.fetch_add(1, Ordering::AcqRel);
        self.counters
            .bytes_out
            .fetch_add(tx.len() as u64, Ordering::AcqRel);
        self.counters
            .bytes_in
            .fetch_add(rx.len() as u64, Ordering::AcqRel);
        Ok(())
    }

    fn close(&mut self) -> Result<(), BusError> {
        self.counters.closed.store(true, Ordering::Release);
        if self.fail_on_close {
            return Err(BusError::Hardware("simulated close failure".to_string()));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        "simulated loopback bus".to_string()
    }
}

/// Hands out a prepared [`SimulatedBus`], optionally after a discovery delay.
#[derive(Debug)]
pub struct SimulatedProvider {
    bus: SimulatedBus,
    discovery_delay: Duration,
}

impl SimulatedProvider {
    pub fn new(bus: SimulatedBus) -> Self {
        Self {
            bus,
            discovery_delay: Duration::ZERO,
        }
    }

    pub fn with_discovery_delay(mut self, delay: Duration) -> Self {
        self.discovery_delay = delay;
        self
    }
}

impl BusProvider for SimulatedProvider {
    fn acquire(self) -> Result<Box<dyn BusHandle>, EngineError> {
        if !self.discovery_delay.is_zero() {
            thread::sleep(self.discovery_delay);
        }
        Ok(Box::new(self.bus))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_duplex_loops_back() {
        let mut bus = SimulatedBus::new();
        let tx = [1u8, 2, 3, 4];
        let mut rx = [0u8; 4];
        bus.transfer_full_duplex(&tx, &mut rx).unwrap();
        assert_eq!(rx, tx);
        assert_eq!(bus.counters().full_duplex.load(Ordering::Acquire), 1);
    }

    #[test]
    fn full_duplex_rejects_mismatched_buffers() {
        let mut bus = SimulatedBus::new();
        let err = bus.transfer_full_duplex(&[0u8; 4], &mut [0u8; 2]).unwrap_err();
        assert_eq!(err, BusError::BufferMismatch { tx: 4, rx: 2 });
    }

    #[test]
    fn fails_exactly_on_requested_call() {
        let mut bus = SimulatedBus::new().fail_at(2);
        assert!(bus.write(&[0u8; 8]).is_ok());
        assert!(matches!(bus.write(&[0u8; 8]), Err(BusError::Hardware(_))));
        assert!(bus.write(&[0u8; 8]).is_ok());
        assert_eq!(bus.counters().writes.load(Ordering::Acquire), 2);
    }

    #[test]
    fn virtual_clock_accumulates_delays_and_throughput() {
        let clock = Arc::new(ManualClock::new());
        let mut bus = SimulatedBus::new()
            .with_delays(vec![Duration::from_millis(2), Duration::from_millis(3)])
            .with_throughput(1_000_000.0)
            .with_virtual_clock(Arc::clone(&clock));
        bus.write(&[0u8; 1000]).unwrap();
        bus.write(&[0u8; 1000]).unwrap();
        // 2ms + 1ms, then 3ms + 1ms
        assert_eq!(clock.elapsed(), Duration::from_millis(7));
    }

    #[test]
    fn closed_bus_rejects_transfers() {
        let mut bus = SimulatedBus::new();
        let counters = bus.counters();
        bus.close().unwrap();
        assert!(counters.is_closed());
        assert!(bus.write(&[0u8; 1]).is_err());
    }

    #[test]
    fn provider_yields_bus() {
        let bus = SimulatedProvider::new(SimulatedBus::new()).acquire().unwrap();
        assert_eq!(bus.describe(), "simulated loopback bus");
    }
}
