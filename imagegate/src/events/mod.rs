//! Pipeline lifecycle events.
//!
//! The orchestrator reports its progress as named events with a JSON
//! payload. Where they end up is the sink's business: the binary routes
//! them to `tracing`, tests collect them.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// A pipeline run began.
pub const PIPELINE_STARTED: &str = "pipeline.started";
/// A stage began for an item.
pub const STAGE_STARTED: &str = "stage.started";
/// A stage produced a Pass or Fail for an item.
pub const STAGE_COMPLETED: &str = "stage.completed";
/// A stage was skipped for an item.
pub const STAGE_SKIPPED: &str = "stage.skipped";
/// Every stage of an item reached a terminal status.
pub const ITEM_COMPLETED: &str = "item.completed";
/// The run finished.
pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
