//! Core domain for pulselytics: the event model, time-range resolution,
//! pure metric reducers, the timeline bucketer, the referrer classifier,
//! and the storage boundary the aggregation engine consumes.

pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod reducers;
pub mod referrer;
pub mod store;
pub mod timeline;
pub mod timerange;

pub use engine::{AggregationEngine, EngineOptions};
pub use error::EngineError;
pub use event::{Event, EventKind, EventType};
pub use store::EventStore;
pub use timerange::TimeRange;
