//! The simulated application deployment pipeline.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use super::{Orchestrator, RunContext};
use crate::errors::{IacflowError, StoreError};
use crate::pipeline::PipelineStage;

impl Orchestrator {
    /// Runs `build → package → deploy → finished` for an application job.
    ///
    /// Each step waits `app_step_delay_ms` and can be cancelled while
    /// waiting. Uses the metadata key `app_name` when present.
    pub async fn run_application(&self, job_id: Uuid) -> Result<(), StoreError> {
        let job = self.store.get(job_id).await.ok_or(StoreError::NotFound(job_id))?;
        let ctx = self.begin(job_id, &job.workspace_id, None, "application").await?;

        let outcome = self.application_stages(&ctx, &job.metadata).await;
        self.finish(&ctx, outcome).await;
        Ok(())
    }

    /// Runs [`Orchestrator::run_application`] on the tokio runtime.
    pub fn spawn_application(self: &Arc<Self>, job_id: Uuid) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.run_application(job_id).await {
                warn!(job_id = %job_id, error = %e, "application pipeline did not start");
            }
        })
    }

    async fn application_stages(
        &self,
        ctx: &RunContext,
        metadata: &HashMap<String, serde_json::Value>,
    ) -> Result<(), IacflowError> {
        let app = metadata
            .get("app_name")
            .and_then(serde_json::Value::as_str)
            .unwrap_or(ctx.workspace_id.as_str());

        let steps = [
            (PipelineStage::Build, format!("Building {app}")),
            (PipelineStage::Package, format!("Packaging {app} into a release artifact")),
            (PipelineStage::Deploy, format!("Rolling out {app}")),
        ];
        for (stage, message) in steps {
            self.enter(ctx, stage).await?;
            ctx.log.info(message).await;
            self.step_delay(ctx).await?;
            ctx.log.success(format!("{stage} step completed")).await;
        }

        self.enter(ctx, PipelineStage::Finished).await
    }

    async fn step_delay(&self, ctx: &RunContext) -> Result<(), IacflowError> {
        let delay = Duration::from_millis(self.config.app_step_delay_ms);
        tokio::select! {
            () = tokio::time::sleep(delay) => Ok(()),
            () = ctx.cancel.cancelled() => Err(IacflowError::Cancelled(ctx.cancel_reason())),
        }
    }
}
