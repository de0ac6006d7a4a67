//! Cooperative cancellation for running jobs.
//!
//! Every pipeline run owns a [`CancellationToken`]. The command runner
//! races the child process against it, and the orchestrator checks it
//! between stages.

mod guard;
mod token;

pub use guard::CredentialFilesGuard;
pub use token::CancellationToken;
