//! Event builder core: fragment handling (C1), sort merge (C2), output
//! framing (C3), the observer registry (C5), and the control surface
//! tying them together. Wire format types live in `evb-wire`.

pub mod config;
pub mod control;
pub mod error;
pub mod handler;
pub mod observer;
pub mod output;
pub mod sort;
pub mod source_queue;
pub mod stats;

pub use config::{BuildWindowMode, EngineConfig};
pub use control::{Command, Engine, Response, RunState};
pub use error::{EvbError, Result};
pub use handler::{ConnId, FragmentHandler, SortBatch};
pub use observer::{
    DataLateObserver, DuplicateTimestampObserver, EventReadyObserver, FlowControlObserver,
    GoodBarrierObserver, NonMonotonicTimestampObserver, ObserverRegistry, PartialBarrierObserver,
};
pub use source_queue::{BarrierSummary, InputStatistics, QueueStatistics, SourceQueue};
pub use stats::{EngineStats, OutOfOrderRecord, OutOfOrderStatistics, OutOfOrderTracker};
