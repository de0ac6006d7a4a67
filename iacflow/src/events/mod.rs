//! Event sink system for job lifecycle observability.
//!
//! The orchestrator emits `job.*` and `stage.*` events to an injected
//! [`EventSink`]. The job log stays the user-facing record; events are for
//! operators and metrics pipelines.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
