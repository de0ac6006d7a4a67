//! Job orchestration.
//!
//! The [`Orchestrator`] owns the collaborators a pipeline needs (job store,
//! command runner, credential provider, preflight check, persistence bridge
//! and event sink) and sequences them into the apply, destroy and
//! application pipelines.
//!
//! Pipelines never return their failures to the caller. Every stage error
//! is logged to the job, recorded as the job's `error` and turns the job
//! `Failed`; callers observe the outcome through [`Orchestrator::get_job`].

mod application;
mod apply;
mod destroy;


use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cancellation::{CancellationToken, CredentialFilesGuard};
use crate::config::OrchestratorConfig;
use crate::core::{CloudProvider, Job, JobKind, JobStatus, CREATED_STAGE};
use crate::credentials::{ConnectionData, CredentialBundle, CredentialProvider};
use crate::errors::{CommandError, IacflowError, PersistenceError, StoreError};
use crate::events::{EventSink, NoOpEventSink};
use crate::observability::StageTimer;
use crate::pipeline::{
    BillingPreflight, InfrastructureStatus, PipelineStage, PreflightCheck, StatePersistence, ToolCommand,
};
use crate::runner::{CommandResult, CommandRunner, ProcessRunner};
use crate::store::{InMemoryJobStore, JobLogger, JobRepository};

/// Drives IaC jobs through their pipelines.
pub struct Orchestrator {
    config: Arc<OrchestratorConfig>,
    store: Arc<dyn JobRepository>,
    runner: Arc<dyn CommandRunner>,
    credentials: Arc<CredentialProvider>,
    preflight: Arc<dyn PreflightCheck>,
    persistence: Arc<dyn StatePersistence>,
    events: Arc<dyn EventSink>,
    cancellations: DashMap<Uuid, Arc<CancellationToken>>,
}

impl Orchestrator {
    /// Creates an orchestrator with the production collaborators.
    ///
    /// Jobs are kept in memory, the IaC tool is spawned as a real process
    /// and credentials are resolved against the live cloud endpoints.
    #[must_use]
    pub fn new(config: OrchestratorConfig, persistence: Arc<dyn StatePersistence>) -> Self {
        Self {
            store: Arc::new(InMemoryJobStore::new()),
            runner: Arc::new(ProcessRunner::from_config(&config)),
            credentials: Arc::new(CredentialProvider::new(&config)),
            preflight: Arc::new(BillingPreflight::new(&config.gcp)),
            persistence,
            events: Arc::new(NoOpEventSink),
            cancellations: DashMap::new(),
            config: Arc::new(config),
        }
    }

    /// Replaces the job repository.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn JobRepository>) -> Self {
        self.store = store;
        self
    }

    /// Replaces the command runner.
    #[must_use]
    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Replaces the credential provider.
    #[must_use]
    pub fn with_credentials(mut self, credentials: CredentialProvider) -> Self {
        self.credentials = Arc::new(credentials);
        self
    }

    /// Replaces the preflight check.
    #[must_use]
    pub fn with_preflight(mut self, preflight: Arc<dyn PreflightCheck>) -> Self {
        self.preflight = preflight;
        self
    }

    /// Sets the lifecycle event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// The job repository.
    #[must_use]
    pub fn store(&self) -> Arc<dyn JobRepository> {
        Arc::clone(&self.store)
    }

    /// Number of pipelines currently running.
    #[must_use]
    pub fn running_jobs(&self) -> usize {
        self.cancellations.len()
    }

    /// Creates a job in the `Init` status and returns its id.
    pub async fn create_job(
        &self,
        kind: JobKind,
        workspace_id: &str,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<Uuid, IacflowError> {
        let job = self.store.create(kind, workspace_id, metadata).await?;

        JobLogger::new(Arc::clone(&self.store), job.id)
            .system(format!("Created {kind} job for workspace '{workspace_id}'"))
            .await;
        info!(job_id = %job.id, workspace_id, kind = %kind, "job created");
        self.events
            .emit(
                "job.created",
                Some(json!({
                    "job_id": job.id.to_string(),
                    "workspace_id": workspace_id,
                    "kind": kind,
                })),
            )
            .await;
        Ok(job.id)
    }

    /// Returns a snapshot of a job.
    pub async fn get_job(&self, job_id: Uuid) -> Option<Job> {
        self.store.get(job_id).await
    }

    /// Returns snapshots of every job, oldest first.
    pub async fn list_jobs(&self) -> Vec<Job> {
        self.store.list().await
    }

    /// Requests cancellation of a job that has not finished yet.
    ///
    /// A running tool command is killed and the pipeline stops before its
    /// next stage. A job no pipeline has picked up yet is failed on the
    /// spot. Returns false if the job is unknown or already finished.
    pub async fn cancel_job(&self, job_id: Uuid, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        if self.signal_cancellation(job_id, &reason) {
            return true;
        }

        match self
            .store
            .compare_and_set_status(job_id, JobStatus::Init, JobStatus::Failed)
            .await
        {
            Ok(()) => {
                self.fail_queued(job_id, IacflowError::Cancelled(reason)).await;
                true
            }
            // A pipeline may have started between the two checks.
            Err(_) => self.signal_cancellation(job_id, &reason),
        }
    }

    fn signal_cancellation(&self, job_id: Uuid, reason: &str) -> bool {
        let Some(token) = self.cancellations.get(&job_id).map(|t| Arc::clone(t.value())) else {
            return false;
        };
        info!(job_id = %job_id, reason, "cancellation requested");
        token.cancel(reason);
        true
    }

    /// Records why a job that never started is now `Failed`.
    async fn fail_queued(&self, job_id: Uuid, err: IacflowError) {
        JobLogger::new(Arc::clone(&self.store), job_id)
            .error(format!("Job failed before start: {err}"))
            .await;
        if let Err(e) = self.store.set_error(job_id, err.to_string()).await {
            warn!(job_id = %job_id, error = %e, "failed to record job error");
        }
        info!(job_id = %job_id, error = %err, "queued job cancelled");
        self.events
            .emit(
                "job.cancelled",
                Some(json!({
                    "job_id": job_id.to_string(),
                    "stage": CREATED_STAGE,
                    "error": err.to_string(),
                })),
            )
            .await;
    }

    /// Moves a job from `Init` to `Running` and sets up its run context.
    ///
    /// The cancellation token is claimed before the status changes, so a
    /// job can only be started once even when the store awaits.
    async fn begin(
        &self,
        job_id: Uuid,
        workspace_id: &str,
        provider: Option<CloudProvider>,
        pipeline: &'static str,
    ) -> Result<RunContext, StoreError> {
        let cancel = Arc::new(CancellationToken::new());
        match self.cancellations.entry(job_id) {
            Entry::Occupied(_) => {
                return Err(StoreError::InvalidTransition {
                    job_id,
                    from: JobStatus::Running,
                    to: JobStatus::Running,
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&cancel));
            }
        }

        if let Err(e) = self.claim(job_id, provider).await {
            self.cancellations
                .remove_if(&job_id, |_, token| Arc::ptr_eq(token, &cancel));
            return Err(e);
        }

        let ctx = RunContext {
            job_id,
            workspace_id: workspace_id.to_string(),
            log: JobLogger::new(Arc::clone(&self.store), job_id),
            cancel,
            stage: Mutex::new(None),
        };

        let target = provider.map_or_else(String::new, |p| format!(" on {p}"));
        ctx.log
            .system(format!("Starting {pipeline} pipeline for workspace '{workspace_id}'{target}"))
            .await;
        info!(job_id = %job_id, workspace_id, pipeline, "pipeline started");
        self.events
            .emit(
                "job.started",
                Some(json!({
                    "job_id": job_id.to_string(),
                    "workspace_id": workspace_id,
                    "pipeline": pipeline,
                    "provider": provider,
                })),
            )
            .await;
        Ok(ctx)
    }

    async fn claim(&self, job_id: Uuid, provider: Option<CloudProvider>) -> Result<(), StoreError> {
        self.store
            .compare_and_set_status(job_id, JobStatus::Init, JobStatus::Running)
            .await?;
        if let Some(provider) = provider {
            self.store.set_provider(job_id, provider).await?;
        }
        Ok(())
    }

    /// Enters `stage`, unless the job was cancelled first.
    async fn enter(&self, ctx: &RunContext, stage: PipelineStage) -> Result<(), IacflowError> {
        if stage.honors_cancellation() && ctx.cancel.is_cancelled() {
            return Err(IacflowError::Cancelled(ctx.cancel_reason()));
        }

        *ctx.stage.lock() = Some(stage);
        self.store.set_stage(ctx.job_id, stage.as_str()).await?;
        ctx.log.system(format!("Stage: {stage}")).await;
        debug!(job_id = %ctx.job_id, stage = %stage, "stage started");
        self.events
            .emit(
                "stage.started",
                Some(json!({ "job_id": ctx.job_id.to_string(), "stage": stage })),
            )
            .await;
        Ok(())
    }

    /// Runs one mutating or planning tool command.
    async fn run_tool(
        &self,
        ctx: &RunContext,
        command: ToolCommand,
        work_dir: &Path,
        env_vars: &HashMap<String, String>,
    ) -> Result<CommandResult, IacflowError> {
        let timer = StageTimer::start(command.name());
        let result = self
            .runner
            .run(&ctx.log, command.request(work_dir, env_vars, &ctx.cancel))
            .await;
        debug!(
            job_id = %ctx.job_id,
            command = timer.stage(),
            exit_code = result.exit_code,
            elapsed_ms = timer.elapsed_ms(),
            "tool command finished"
        );

        let tool = &self.config.tool_display_name;
        if result.success {
            ctx.log.success(format!("{tool} {} completed", command.name())).await;
            return Ok(result);
        }
        if result.cancelled {
            return Err(IacflowError::Cancelled(ctx.cancel_reason()));
        }
        Err(CommandError::new(tool, command.name(), result.exit_code)
            .with_timed_out(result.timed_out)
            .into())
    }

    /// Resolves credentials and registers their secrets and files with the run.
    async fn resolve_credentials(
        &self,
        ctx: &RunContext,
        provider: CloudProvider,
        connection: &ConnectionData,
        work_dir: &Path,
        guard: &mut CredentialFilesGuard,
    ) -> Result<CredentialBundle, IacflowError> {
        let mut bundle = self.credentials.resolve(provider, connection, work_dir).await?;
        guard.track(bundle.credential_files.iter().cloned());
        ctx.log.register_secrets(&bundle.env_vars);
        bundle.project_template_vars(provider);

        let source = bundle.source.as_deref().unwrap_or("connection record");
        ctx.log
            .info(format!("Resolved {provider} credentials ({source})"))
            .await;
        if !bundle.credential_files.is_empty() {
            ctx.log
                .system(format!(
                    "Wrote {} short-lived credential file(s)",
                    bundle.credential_files.len()
                ))
                .await;
        }
        Ok(bundle)
    }

    /// Deletes every credential file the run created.
    async fn release_credentials(&self, ctx: &RunContext, guard: &mut CredentialFilesGuard) {
        let tracked = guard.files().len();
        if tracked == 0 {
            return;
        }

        let failures = guard.release().await;
        for (path, e) in &failures {
            ctx.log
                .warn(format!("Failed to remove credential file {}: {e}", path.display()))
                .await;
        }
        ctx.log
            .system(format!(
                "Removed {} of {tracked} credential file(s)",
                tracked - failures.len()
            ))
            .await;
    }

    /// Hands a result to the persistence bridge. Failures are logged only.
    async fn persist(
        &self,
        ctx: &RunContext,
        provider: CloudProvider,
        outputs: &BTreeMap<String, String>,
        status: InfrastructureStatus,
    ) {
        match self
            .persistence
            .save(&ctx.workspace_id, provider, outputs, status)
            .await
        {
            Ok(()) => {
                ctx.log
                    .success(format!(
                        "Recorded {status} state for workspace '{}'",
                        ctx.workspace_id
                    ))
                    .await;
            }
            Err(e) => {
                let err = PersistenceError::new(&ctx.workspace_id, format!("{e:#}"));
                error!(job_id = %ctx.job_id, error = %err, "state persistence failed");
                ctx.log
                    .error(format!("{err}. The infrastructure change was not rolled back"))
                    .await;
            }
        }
    }

    /// Records the terminal status of a run.
    async fn finish(&self, ctx: &RunContext, outcome: Result<(), IacflowError>) {
        self.cancellations.remove(&ctx.job_id);
        let job_id = ctx.job_id;

        match outcome {
            Ok(()) => {
                ctx.log.success("Job completed").await;
                if let Err(e) = self.store.set_status(job_id, JobStatus::Completed).await {
                    warn!(job_id = %job_id, error = %e, "failed to mark job completed");
                }
                info!(job_id = %job_id, "job completed");
                self.events
                    .emit("job.completed", Some(json!({ "job_id": job_id.to_string() })))
                    .await;
            }
            Err(err) => {
                let stage = ctx.current_stage().map_or("startup", |s| s.as_str());
                ctx.log.error(format!("{stage} stage failed: {err}")).await;
                error!(job_id = %job_id, stage, category = err.category(), error = %err, "job failed");

                if let Err(e) = self.store.set_error(job_id, err.to_string()).await {
                    warn!(job_id = %job_id, error = %e, "failed to record job error");
                }
                if let Err(e) = self.store.set_status(job_id, JobStatus::Failed).await {
                    warn!(job_id = %job_id, error = %e, "failed to mark job failed");
                }

                let data = json!({
                    "job_id": job_id.to_string(),
                    "stage": stage,
                    "error": err.to_string(),
                });
                self.events.emit("stage.failed", Some(data.clone())).await;
                let event = if matches!(err, IacflowError::Cancelled(_)) {
                    "job.cancelled"
                } else {
                    "job.failed"
                };
                self.events.emit(event, Some(data)).await;
            }
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("active_jobs", &self.cancellations.len())
            .finish_non_exhaustive()
    }
}

/// State shared by the stages of one pipeline run.
struct RunContext {
    job_id: Uuid,
    workspace_id: String,
    log: JobLogger,
    cancel: Arc<CancellationToken>,
    stage: Mutex<Option<PipelineStage>>,
}

impl RunContext {
    fn current_stage(&self) -> Option<PipelineStage> {
        *self.stage.lock()
    }

    fn cancel_reason(&self) -> String {
        self.cancel
            .reason()
            .unwrap_or_else(|| "cancellation requested".to_string())
    }
}
