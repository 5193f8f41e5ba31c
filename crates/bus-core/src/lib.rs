pub mod bus;
#[cfg(feature = "simulation")]
pub mod bus_sim;
pub mod cancel;
pub mod engine;
pub mod error;
pub mod measurement;
pub mod sink;
pub mod sync;
pub mod tags;
pub mod timebase;
pub mod transfer_loop;
pub mod window;

pub use bus::{perform_transfer, BusHandle, BusProvider, BusSettings, UnavailableProvider};
#[cfg(feature = "simulation")]
pub use bus_sim::{BusCounters, SimulatedBus, SimulatedProvider};
pub use cancel::CancellationSignal;
pub use engine::{EngineOptions, MeasurementEngine};
pub use error::{BusError, EngineError};
pub use measurement::{
    transfer_rate, EngineStatus, MeasurementConfig, RunOutcome, TransferMethod,
    DEFAULT_BUFFER_SIZE, DEFAULT_TRANSFER_COUNT,
};
pub use sink::{ChannelSink, EngineEvent, PublishSink, RecordingSink};
pub use sync::{EngineSnapshot, PublishedState};
pub use timebase::{Clock, ManualClock, TimeBase};
pub use transfer_loop::{run_transfers, RunPlan};
pub use window::RateWindow;
