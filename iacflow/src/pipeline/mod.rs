//! Building blocks of the stage pipelines.
//!
//! The orchestrator sequences these: stage names, the tool's fixed flag
//! sets, working directory handling, output flattening, preflight checks
//! and the persistence bridge.

mod commands;
mod outputs;
mod persistence;
mod preflight;
mod stage;
mod workdir;

pub use commands::{ToolCommand, PLAN_FILE};
pub use outputs::flatten_outputs;
pub use persistence::{InfrastructureStatus, StatePersistence};
pub use preflight::{
    BillingClient, BillingPreflight, GcpBillingClient, PreflightCheck, PreflightOutcome,
};
pub use stage::PipelineStage;
pub use workdir::{prepare_work_dir, remove_work_dir, work_dir_exists, STALE_STATE};

#[cfg(test)]
pub use preflight::MockBillingClient;
