//! Core domain model types for iacflow.
//!
//! This module contains the fundamental types used throughout the engine:
//! - Job status, kind and log severity enums
//! - The cloud provider enum
//! - The job record and its append-only log entries

mod job;
mod provider;
mod status;

pub use job::{Job, LogEntry, CREATED_STAGE};
pub use provider::CloudProvider;
pub use status::{JobKind, JobStatus, Severity};
