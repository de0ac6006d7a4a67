//! Pipeline stage names.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A named step of a job pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineStage {
    /// Create the working directory and write the IaC files.
    Setup,
    /// Resolve cloud credentials.
    Credentials,
    /// Provider account sanity checks.
    Preflight,
    /// `init`.
    Init,
    /// `plan`.
    Plan,
    /// `apply`.
    Apply,
    /// Read and flatten the tool outputs.
    Outputs,
    /// Hand outputs to the persistence bridge.
    Persist,
    /// Terminal stage of every successful pipeline.
    Finished,
    /// Verify a prior apply left a working directory.
    SetupCheck,
    /// `destroy`.
    Destroy,
    /// Remove the working directory after a destroy.
    Cleanup,
    /// Simulated application build.
    Build,
    /// Simulated application packaging.
    Package,
    /// Simulated application rollout.
    Deploy,
}

impl PipelineStage {
    /// Stages of the apply pipeline, in order.
    pub const APPLY: [Self; 9] = [
        Self::Setup,
        Self::Credentials,
        Self::Preflight,
        Self::Init,
        Self::Plan,
        Self::Apply,
        Self::Outputs,
        Self::Persist,
        Self::Finished,
    ];

    /// Stages of the destroy pipeline, in order.
    pub const DESTROY: [Self; 5] = [
        Self::SetupCheck,
        Self::Credentials,
        Self::Destroy,
        Self::Cleanup,
        Self::Finished,
    ];

    /// Stages of the application pipeline, in order.
    pub const APPLICATION: [Self; 4] = [Self::Build, Self::Package, Self::Deploy, Self::Finished];

    /// The label stored on the job.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Credentials => "credentials",
            Self::Preflight => "preflight",
            Self::Init => "init",
            Self::Plan => "plan",
            Self::Apply => "apply",
            Self::Outputs => "outputs",
            Self::Persist => "persist",
            Self::Finished => "finished",
            Self::SetupCheck => "setup-check",
            Self::Destroy => "destroy",
            Self::Cleanup => "cleanup",
            Self::Build => "build",
            Self::Package => "package",
            Self::Deploy => "deploy",
        }
    }

    /// Whether a pending cancellation stops the pipeline before this stage.
    ///
    /// Stages after a successful `apply` or `destroy` always run so the
    /// result of the mutation is recorded.
    #[must_use]
    pub const fn honors_cancellation(&self) -> bool {
        !matches!(self, Self::Outputs | Self::Persist | Self::Cleanup | Self::Finished)
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
