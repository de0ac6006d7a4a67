//! External IaC tool invocation.
//!
//! A [`CommandRunner`] executes one `<tool> <command> <args...>` call for a
//! job and reports the outcome as a [`CommandResult`]. Runners never
//! return errors: spawn failures, non-zero exits, timeouts and
//! cancellations are all encoded in the result.

mod process;
mod request;

pub use process::{ProcessRunner, HARDENING_ENV};
pub use request::{CommandRequest, CommandResult};

use async_trait::async_trait;

use crate::store::JobLogger;

/// Executes IaC tool commands on behalf of a job.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs one command, streaming its output into `log`.
    async fn run(&self, log: &JobLogger, request: CommandRequest) -> CommandResult;
}
