//! Tests for the in-memory job repository and job logger.

#[cfg(test)]
mod tests {
    use crate::core::{CloudProvider, JobKind, JobStatus, Severity};
    use crate::errors::StoreError;
    use crate::store::{InMemoryJobStore, JobLogger, JobRepository};
    use std::collections::{BTreeMap, HashMap};
    use std::sync::Arc;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_create_and_get_snapshot() {
        let store = InMemoryJobStore::new();
        let mut metadata = HashMap::new();
        metadata.insert("purpose".to_string(), serde_json::json!("deploy"));

        let job = store.create(JobKind::Infrastructure, "ws-1", metadata).await.unwrap();
        let mut snapshot = store.get(job.id).await.unwrap();
        snapshot.stage = "tampered".to_string();

        let fresh = store.get(job.id).await.unwrap();
        assert_eq!(fresh.stage, "created");
        assert_eq!(fresh.metadata["purpose"], "deploy");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let store = InMemoryJobStore::new();
        let id = Uuid::new_v4();

        assert!(store.get(id).await.is_none());
        let err = store.append_log(id, Severity::Info, "x".to_string()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(found) if found == id));
    }

    #[tokio::test]
    async fn test_store_enforces_job_invariants() {
        let store = InMemoryJobStore::new();
        let job = store.create(JobKind::Infrastructure, "ws", HashMap::new()).await.unwrap();

        store.set_stage(job.id, "setup").await.unwrap();
        store.set_stage(job.id, "plan").await.unwrap();
        assert!(store.set_stage(job.id, "setup").await.is_err());

        store.set_status(job.id, JobStatus::Running).await.unwrap();
        store.set_status(job.id, JobStatus::Completed).await.unwrap();
        assert!(store.set_status(job.id, JobStatus::Failed).await.is_err());

        store.set_provider(job.id, CloudProvider::Gcp).await.unwrap();
        store.set_error(job.id, "boom".to_string()).await.unwrap();
        let mut outputs = BTreeMap::new();
        outputs.insert("url".to_string(), "https://x".to_string());
        store.set_outputs(job.id, outputs.clone()).await.unwrap();

        let job = store.get(job.id).await.unwrap();
        assert_eq!(job.stage, "plan");
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.provider, Some(CloudProvider::Gcp));
        assert_eq!(job.error.as_deref(), Some("boom"));
        assert_eq!(job.outputs, outputs);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_and_readers() {
        let store: Arc<InMemoryJobStore> = Arc::new(InMemoryJobStore::new());
        let job = store.create(JobKind::Infrastructure, "ws", HashMap::new()).await.unwrap();

        let writer = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                for i in 0..200 {
                    store.append_log(job.id, Severity::Info, format!("line {i}")).await.unwrap();
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    let mut last_len = 0;
                    for _ in 0..50 {
                        let snapshot = store.get(job.id).await.unwrap();
                        assert!(snapshot.logs.len() >= last_len);
                        last_len = snapshot.logs.len();
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        writer.await.unwrap();
        for reader in readers {
            reader.await.unwrap();
        }

        let job = store.get(job.id).await.unwrap();
        assert_eq!(job.logs.len(), 200);
        assert!(job.logs.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_compare_and_set_status_has_one_winner() {
        let store: Arc<InMemoryJobStore> = Arc::new(InMemoryJobStore::new());
        let job = store.create(JobKind::Infrastructure, "ws", HashMap::new()).await.unwrap();

        let starters: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store
                        .compare_and_set_status(job.id, JobStatus::Init, JobStatus::Running)
                        .await
                })
            })
            .collect();

        let mut won = 0;
        for starter in starters {
            match starter.await.unwrap() {
                Ok(()) => won += 1,
                Err(err) => assert!(matches!(
                    err,
                    StoreError::InvalidTransition { from: JobStatus::Running, to: JobStatus::Running, .. }
                )),
            }
        }
        assert_eq!(won, 1);
        assert_eq!(store.get(job.id).await.unwrap().status, JobStatus::Running);
    }

    #[tokio::test]
    async fn test_compare_and_set_status_checks_current_status() {
        let store = InMemoryJobStore::new();
        let job = store.create(JobKind::Infrastructure, "ws", HashMap::new()).await.unwrap();

        let err = store
            .compare_and_set_status(job.id, JobStatus::Running, JobStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { from: JobStatus::Init, .. }));

        store
            .compare_and_set_status(job.id, JobStatus::Init, JobStatus::Failed)
            .await
            .unwrap();
        let job = store.get(job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.end_time.is_some());
    }

    #[tokio::test]
    async fn test_list_is_ordered_by_start_time() {
        let store = InMemoryJobStore::new();
        let a = store.create(JobKind::Infrastructure, "a", HashMap::new()).await.unwrap();
        let b = store.create(JobKind::Application, "b", HashMap::new()).await.unwrap();

        let ids: Vec<_> = store.list().await.into_iter().map(|j| j.id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&a.id) && ids.contains(&b.id));
    }

    #[tokio::test]
    async fn test_logger_redacts_registered_secrets() {
        let store: Arc<dyn JobRepository> = Arc::new(InMemoryJobStore::new());
        let job = store.create(JobKind::Infrastructure, "ws", HashMap::new()).await.unwrap();
        let logger = JobLogger::new(Arc::clone(&store), job.id);

        logger.info("before registration: hunter2").await;
        let clone = logger.clone();
        let mut env = HashMap::new();
        env.insert("ARM_CLIENT_SECRET".to_string(), "hunter2".to_string());
        logger.register_secrets(&env);
        clone.error("after registration: hunter2").await;

        let job = store.get(job.id).await.unwrap();
        assert_eq!(job.logs[0].message, "before registration: hunter2");
        assert_eq!(job.logs[1].message, "after registration: [REDACTED]");
        assert_eq!(job.logs[1].severity, Severity::Error);
    }

    #[tokio::test]
    async fn test_logger_ignores_missing_job() {
        let store: Arc<dyn JobRepository> = Arc::new(InMemoryJobStore::new());
        let logger = JobLogger::new(store, Uuid::new_v4());
        logger.system("goes nowhere").await;
    }
}
