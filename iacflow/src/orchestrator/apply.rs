//! The apply pipeline.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use super::{Orchestrator, RunContext};
use crate::cancellation::{CancellationToken, CredentialFilesGuard};
use crate::core::CloudProvider;
use crate::credentials::ConnectionData;
use crate::errors::{IacflowError, StoreError};
use crate::pipeline::{
    flatten_outputs, prepare_work_dir, InfrastructureStatus, PipelineStage, PreflightOutcome, ToolCommand,
};
use crate::utils::validate_workspace_segment;

impl Orchestrator {
    /// Runs `setup → credentials → preflight → init → plan → apply →
    /// outputs → persist → finished` for a job.
    ///
    /// Returns once the job has reached a terminal status. The only errors
    /// returned are for a job that does not exist or was already started;
    /// pipeline failures are recorded on the job.
    pub async fn run_apply(
        &self,
        job_id: Uuid,
        provider: CloudProvider,
        workspace_id: &str,
        files: HashMap<String, String>,
        connection: ConnectionData,
    ) -> Result<(), StoreError> {
        let ctx = self.begin(job_id, workspace_id, Some(provider), "apply").await?;
        let mut guard = CredentialFilesGuard::new();

        let outcome = self
            .apply_stages(&ctx, provider, &files, &connection, &mut guard)
            .await;
        self.release_credentials(&ctx, &mut guard).await;
        self.finish(&ctx, outcome).await;
        Ok(())
    }

    /// Runs [`Orchestrator::run_apply`] on the tokio runtime.
    pub fn spawn_apply(
        self: &Arc<Self>,
        job_id: Uuid,
        provider: CloudProvider,
        workspace_id: impl Into<String>,
        files: HashMap<String, String>,
        connection: ConnectionData,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let workspace_id = workspace_id.into();
        tokio::spawn(async move {
            if let Err(e) = this
                .run_apply(job_id, provider, &workspace_id, files, connection)
                .await
            {
                warn!(job_id = %job_id, error = %e, "apply pipeline did not start");
            }
        })
    }

    async fn apply_stages(
        &self,
        ctx: &RunContext,
        provider: CloudProvider,
        files: &HashMap<String, String>,
        connection: &ConnectionData,
        guard: &mut CredentialFilesGuard,
    ) -> Result<(), IacflowError> {
        self.enter(ctx, PipelineStage::Setup).await?;
        validate_workspace_segment(&ctx.workspace_id)?;
        let work_dir = self.config.work_dir(&ctx.workspace_id, provider);
        let written = prepare_work_dir(&work_dir, files).await?;
        ctx.log
            .info(format!("Wrote {} file(s) to {}", written.len(), work_dir.display()))
            .await;

        self.enter(ctx, PipelineStage::Credentials).await?;
        let bundle = self
            .resolve_credentials(ctx, provider, connection, &work_dir, guard)
            .await?;

        self.enter(ctx, PipelineStage::Preflight).await?;
        match self.preflight.check(provider, connection, &bundle).await? {
            PreflightOutcome::Passed(message) => ctx.log.success(message).await,
            PreflightOutcome::Skipped(message) => ctx.log.system(message).await,
        }

        for (stage, command) in [
            (PipelineStage::Init, ToolCommand::Init),
            (PipelineStage::Plan, ToolCommand::Plan),
            (PipelineStage::Apply, ToolCommand::Apply),
        ] {
            self.enter(ctx, stage).await?;
            self.run_tool(ctx, command, &work_dir, &bundle.env_vars).await?;
        }

        self.enter(ctx, PipelineStage::Outputs).await?;
        let outputs = self.capture_outputs(ctx, &work_dir, &bundle.env_vars).await;
        if !outputs.is_empty() {
            self.store.set_outputs(ctx.job_id, outputs.clone()).await?;
        }

        self.enter(ctx, PipelineStage::Persist).await?;
        self.persist(ctx, provider, &outputs, InfrastructureStatus::Deployed)
            .await;

        self.enter(ctx, PipelineStage::Finished).await?;
        ctx.log
            .system(format!("Working directory kept at {}", work_dir.display()))
            .await;
        Ok(())
    }

    /// Reads `output -json`. Any failure yields an empty map.
    async fn capture_outputs(
        &self,
        ctx: &RunContext,
        work_dir: &Path,
        env_vars: &HashMap<String, String>,
    ) -> BTreeMap<String, String> {
        // The apply already happened, so the read is not tied to the job's token.
        let request = ToolCommand::Output.request(work_dir, env_vars, &Arc::new(CancellationToken::new()));
        let result = self.runner.run(&ctx.log, request).await;
        if !result.success {
            ctx.log
                .warn(format!(
                    "{} output failed with exit code {}; continuing with no outputs",
                    self.config.tool_display_name, result.exit_code
                ))
                .await;
            return BTreeMap::new();
        }

        match flatten_outputs(result.stdout.as_deref().unwrap_or_default()) {
            Ok(outputs) => {
                ctx.log
                    .info(format!("Captured {} output value(s)", outputs.len()))
                    .await;
                outputs
            }
            Err(e) => {
                warn!(job_id = %ctx.job_id, error = %e, "could not parse tool outputs");
                ctx.log
                    .warn(format!("{e}; continuing with no outputs"))
                    .await;
                BTreeMap::new()
            }
        }
    }
}
