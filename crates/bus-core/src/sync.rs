use crate::measurement::EngineStatus;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// f64 stored as raw bits for lock-free publication.
#[derive(Debug, Default)]
pub struct AtomicRate {
    bits: AtomicU64,
}

impl AtomicRate {
    pub fn new(value: f64) -> Self {
        Self {
            bits: AtomicU64::new(value.to_bits()),
        }
    }

    pub fn store(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Release);
    }

    pub fn load(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSnapshot {
    pub status: EngineStatus,
    pub last_rate: f64,
    pub average_rate: f64,
    pub transfers: u64,
}

/// Values shared between the worker and any number of readers.
///
/// Written only by the engine; every field is a single atomic word.
#[derive(Debug)]
pub struct PublishedState {
    status: AtomicU8,
    last_rate: AtomicRate,
    average_rate: AtomicRate,
    transfers: AtomicU64,
}

impl Default for PublishedState {
    fn default() -> Self {
        Self::new()
    }
}

impl PublishedState {
    pub fn new() -> Self {
        Self {
            status: AtomicU8::new(EngineStatus::Initializing.to_u8()),
            last_rate: AtomicRate::default(),
            average_rate: AtomicRate::default(),
            transfers: AtomicU64::new(0),
        }
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub(crate) fn set_status(&self, status: EngineStatus) {
        self.status.store(status.to_u8(), Ordering::Release);
    }

    /// Atomically move `from` -> `to`; returns the observed status on failure.
    pub(crate) fn transition(
        &self,
        from: EngineStatus,
        to: EngineStatus,
    ) -> Result<(), EngineStatus> {
        self.status
            .compare_exchange(from.to_u8(), to.to_u8(), Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(EngineStatus::from_u8)
    }

    pub fn last_rate(&self) -> f64 {
        self.last_rate.load()
    }

    pub(crate) fn publish_sample(&self, rate: f64) {
        self.last_rate.store(rate);
        self.transfers.fetch_add(1, Ordering::AcqRel);
    }

    pub fn average_rate(&self) -> f64 {
        self.average_rate.load()
    }

    pub(crate) fn publish_average(&self, rate: f64) {
        self.average_rate.store(rate);
    }

    /// Transfers completed over the engine's lifetime.
    pub fn transfers(&self) -> u64 {
        self.transfers.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            status: self.status(),
            last_rate: self.last_rate(),
            average_rate: self.average_rate(),
            transfers: self.transfers(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_initializing_with_zero_rates() {
        let state = PublishedState::new();
        let snap = state.snapshot();
        assert_eq!(snap.status, EngineStatus::Initializing);
        assert_eq!(snap.last_rate, 0.0);
        assert_eq!(snap.average_rate, 0.0);
        assert_eq!(snap.transfers, 0);
    }

    #[test]
    fn transition_is_compare_and_swap() {
        let state = PublishedState::new();
        assert_eq!(
            state.transition(EngineStatus::Idle, EngineStatus::Running),
            Err(EngineStatus::Initializing)
        );
        state.set_status(EngineStatus::Idle);
        assert!(state
            .transition(EngineStatus::Idle, EngineStatus::Running)
            .is_ok());
        assert_eq!(state.status(), EngineStatus::Running);
    }

    #[test]
    fn rates_round_trip_bits() {
        let state = PublishedState::new();
        state.publish_sample(123_456.789);
        state.publish_average(98_765.4321);
        assert_eq!(state.last_rate(), 123_456.789);
        assert_eq!(state.average_rate(), 98_765.4321);
        assert_eq!(state.transfers(), 1);
    }
}
