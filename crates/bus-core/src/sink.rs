//! Observer side of the engine.
//!
//! The engine calls into a [`PublishSink`] from its worker thread after every
//! transfer, so implementations must be cheap and must not block.

use crate::error::EngineError;
use crate::measurement::EngineStatus;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};

pub trait PublishSink: Send + Sync {
    fn set_last_rate(&self, rate: f64);
    fn set_average_rate(&self, rate: f64);
    fn set_status(&self, status: EngineStatus);

    /// A run aborted on a transfer failure. Called at most once per run.
    fn report_failure(&self, _error: &EngineError) {}
}

impl PublishSink for () {
    fn set_last_rate(&self, _rate: f64) {}
    fn set_average_rate(&self, _rate: f64) {}
    fn set_status(&self, _status: EngineStatus) {}
}

impl<S: PublishSink + ?Sized> PublishSink for Arc<S> {
    fn set_last_rate(&self, rate: f64) {
        (**self).set_last_rate(rate)
    }

    fn set_average_rate(&self, rate: f64) {
        (**self).set_average_rate(rate)
    }

    fn set_status(&self, status: EngineStatus) {
        (**self).set_status(status)
    }

    fn report_failure(&self, error: &EngineError) {
        (**self).report_failure(error)
    }
}

impl<A: PublishSink, B: PublishSink> PublishSink for (A, B) {
    fn set_last_rate(&self, rate: f64) {
        self.0.set_last_rate(rate);
        self.1.set_last_rate(rate);
    }

    fn set_average_rate(&self, rate: f64) {
        self.0.set_average_rate(rate);
        self.1.set_average_rate(rate);
    }

    fn set_status(&self, status: EngineStatus) {
        self.0.set_status(status);
        self.1.set_status(status);
    }

    fn report_failure(&self, error: &EngineError) {
        self.0.report_failure(error);
        self.1.report_failure(error);
    }
}

/// One published change, in publication order.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Status(EngineStatus),
    LastRate(f64),
    AverageRate(f64),
    Failure(EngineError),
}

/// Forwards every publication into an mpsc channel.
///
/// A dropped receiver is not an error; events are discarded.
#[derive(Debug)]
pub struct ChannelSink {
    tx: Sender<EngineEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, Receiver<EngineEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }
}

impl PublishSink for ChannelSink {
    fn set_last_rate(&self, rate: f64) {
        self.send(EngineEvent::LastRate(rate));
    }

    fn set_average_rate(&self, rate: f64) {
        self.send(EngineEvent::AverageRate(rate));
    }

    fn set_status(&self, status: EngineStatus) {
        self.send(EngineEvent::Status(status));
    }

    fn report_failure(&self, error: &EngineError) {
        self.send(EngineEvent::Failure(error.clone()));
    }
}

/// Keeps every event in memory; handy for inspecting a finished run.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<EngineEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: EngineEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn rates(&self) -> Vec<f64> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                EngineEvent::LastRate(rate) => Some(rate),
                _ => None,
            })
            .collect()
    }

    pub fn averages(&self) -> Vec<f64> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                EngineEvent::AverageRate(rate) => Some(rate),
                _ => None,
            })
            .collect()
    }

    pub fn statuses(&self) -> Vec<EngineStatus> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                EngineEvent::Status(status) => Some(status),
                _ => None,
            })
            .collect()
    }

    pub fn failures(&self) -> Vec<EngineError> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                EngineEvent::Failure(err) => Some(err),
                _ => None,
            })
            .collect()
    }
}

impl PublishSink for RecordingSink {
    fn set_last_rate(&self, rate: f64) {
        self.push(EngineEvent::LastRate(rate));
    }

    fn set_average_rate(&self, rate: f64) {
        self.push(EngineEvent::AverageRate(rate));
    }

    fn set_status(&self, status: EngineStatus) {
        self.push(EngineEvent::Status(status));
    }

    fn report_failure(&self, error: &EngineError) {
        self.push(EngineEvent::Failure(error.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_sink_preserves_order() {
        let (sink, rx) = ChannelSink::new();
        sink.set_status(EngineStatus::Running);
        sink.set_last_rate(1.0);
        sink.set_last_rate(2.0);
        sink.set_average_rate(1.5);
        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                EngineEvent::Status(EngineStatus::Running),
                EngineEvent::LastRate(1.0),
                EngineEvent::LastRate(2.0),
                EngineEvent::AverageRate(1.5),
            ]
        );
    }

    #[test]
    fn channel_sink_survives_dropped_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.set_last_rate(42.0);
    }

    #[test]
    fn channel_sink_shared_across_threads() {
        let (sink, rx) = ChannelSink::new();
        let sink = Arc::new(sink);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let sink = Arc::clone(&sink);
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        sink.set_last_rate(1.0);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        drop(sink);
        assert_eq!(rx.iter().count(), 100);
    }

    #[test]
    fn tuple_fans_out() {
        let a = Arc::new(RecordingSink::new());
        let b = Arc::new(RecordingSink::new());
        let both = (Arc::clone(&a), Arc::clone(&b));
        both.set_last_rate(7.0);
        both.report_failure(&EngineError::WorkerPanicked);
        assert_eq!(a.rates(), vec![7.0]);
        assert_eq!(b.rates(), vec![7.0]);
        assert_eq!(b.failures(), vec![EngineError::WorkerPanicked]);
    }
}
