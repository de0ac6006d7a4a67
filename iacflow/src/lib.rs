//! # Iacflow
//!
//! A deployment orchestration engine that drives an external
//! Infrastructure-as-Code tool (Terraform or a compatible CLI) through an
//! `init → plan → apply` or `destroy` lifecycle against AWS, GCP or Azure.
//!
//! Iacflow provides:
//!
//! - **Credential resolution**: per-provider resolvers that turn a stored
//!   connection record into environment variables (and, for GCP, a
//!   short-lived credential file), with an ordered fallback chain for Azure
//! - **Command supervision**: spawning the IaC tool, streaming its output
//!   into a job log line by line, redacting secrets and enforcing a hard
//!   timeout
//! - **Job tracking**: a concurrency-safe job repository that external
//!   pollers read while pipelines write
//! - **Stage pipelines**: the apply and destroy pipelines, which fail fast,
//!   never roll back, and always remove credential files
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use iacflow::prelude::*;
//!
//! let orchestrator = Arc::new(Orchestrator::new(config, persistence));
//! let job_id = orchestrator
//!     .create_job(JobKind::Infrastructure, "ws-42", HashMap::new())
//!     .await?;
//!
//! orchestrator.spawn_apply(job_id, CloudProvider::Aws, "ws-42", files, connection);
//!
//! // Poll from anywhere
//! let job = orchestrator.get_job(job_id).await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod core;
pub mod credentials;
pub mod errors;
pub mod events;
pub mod observability;
pub mod orchestrator;
pub mod pipeline;
pub mod runner;
pub mod store;
pub mod testing;
pub mod utils;

pub use orchestrator::Orchestrator;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{AwsSettings, AzureSettings, GcpSettings, OrchestratorConfig};
    pub use crate::core::{
        CloudProvider, Job, JobKind, JobStatus, LogEntry, Severity,
    };
    pub use crate::credentials::{
        sanitize_log, ConnectionData, CredentialBundle, CredentialProvider, RedactionRegistry,
    };
    pub use crate::errors::{
        CommandError, CredentialError, IacflowError, OutputParseError, PersistenceError,
        PreflightError, StoreError, ValidationError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::orchestrator::Orchestrator;
    pub use crate::pipeline::{
        flatten_outputs, InfrastructureStatus, PipelineStage, PreflightCheck, StatePersistence,
    };
    pub use crate::runner::{CommandRequest, CommandResult, CommandRunner, ProcessRunner};
    pub use crate::store::{InMemoryJobStore, JobLogger, JobRepository};
    pub use std::collections::HashMap;
    pub use std::sync::Arc;
}
