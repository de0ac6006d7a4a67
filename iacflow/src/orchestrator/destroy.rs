//! The destroy pipeline.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use super::{Orchestrator, RunContext};
use crate::cancellation::CredentialFilesGuard;
use crate::core::CloudProvider;
use crate::credentials::ConnectionData;
use crate::errors::{IacflowError, StoreError, ValidationError};
use crate::pipeline::{remove_work_dir, work_dir_exists, InfrastructureStatus, PipelineStage, ToolCommand};
use crate::utils::validate_workspace_segment;

impl Orchestrator {
    /// Runs `setup-check → credentials → destroy → cleanup → finished`
    /// against the working directory a prior apply left behind.
    ///
    /// Same contract as [`Orchestrator::run_apply`].
    pub async fn run_destroy(
        &self,
        job_id: Uuid,
        provider: CloudProvider,
        workspace_id: &str,
        connection: ConnectionData,
    ) -> Result<(), StoreError> {
        let ctx = self.begin(job_id, workspace_id, Some(provider), "destroy").await?;
        let mut guard = CredentialFilesGuard::new();

        let outcome = self
            .destroy_stages(&ctx, provider, &connection, &mut guard)
            .await;
        self.release_credentials(&ctx, &mut guard).await;
        self.finish(&ctx, outcome).await;
        Ok(())
    }

    /// Runs [`Orchestrator::run_destroy`] on the tokio runtime.
    pub fn spawn_destroy(
        self: &Arc<Self>,
        job_id: Uuid,
        provider: CloudProvider,
        workspace_id: impl Into<String>,
        connection: ConnectionData,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let workspace_id = workspace_id.into();
        tokio::spawn(async move {
            if let Err(e) = this
                .run_destroy(job_id, provider, &workspace_id, connection)
                .await
            {
                warn!(job_id = %job_id, error = %e, "destroy pipeline did not start");
            }
        })
    }

    async fn destroy_stages(
        &self,
        ctx: &RunContext,
        provider: CloudProvider,
        connection: &ConnectionData,
        guard: &mut CredentialFilesGuard,
    ) -> Result<(), IacflowError> {
        self.enter(ctx, PipelineStage::SetupCheck).await?;
        validate_workspace_segment(&ctx.workspace_id)?;
        let work_dir = self.config.work_dir(&ctx.workspace_id, provider);
        if !work_dir_exists(&work_dir).await {
            return Err(ValidationError::StateNotFound {
                workspace_id: ctx.workspace_id.clone(),
                provider,
            }
            .into());
        }
        ctx.log
            .info(format!("Using working directory {}", work_dir.display()))
            .await;

        self.enter(ctx, PipelineStage::Credentials).await?;
        let bundle = self
            .resolve_credentials(ctx, provider, connection, &work_dir, guard)
            .await?;

        self.enter(ctx, PipelineStage::Destroy).await?;
        self.run_tool(ctx, ToolCommand::Destroy, &work_dir, &bundle.env_vars)
            .await?;

        self.enter(ctx, PipelineStage::Cleanup).await?;
        match remove_work_dir(&work_dir).await {
            Ok(()) => {
                ctx.log
                    .system(format!("Removed working directory {}", work_dir.display()))
                    .await;
            }
            Err(e) => {
                warn!(job_id = %ctx.job_id, error = %e, "failed to remove working directory");
                ctx.log
                    .warn(format!(
                        "Failed to remove working directory {}: {e}",
                        work_dir.display()
                    ))
                    .await;
            }
        }
        self.persist(ctx, provider, &BTreeMap::new(), InfrastructureStatus::Destroyed)
            .await;

        self.enter(ctx, PipelineStage::Finished).await
    }
}
