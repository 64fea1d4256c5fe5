//! In-memory async job handles for `/processing/process-async`, driven by a
//! `tokio::spawn`'d task running the same pipeline the synchronous endpoint
//! uses. Grounded in the teacher's `tokio::spawn`-based workflow execution
//! and daemon-loop patterns, since the distilled source only exposes a
//! synchronous pipeline endpoint.

use crate::domain::ProcessingResult;
#[cfg(test)]
use crate::domain::Summary;
use crate::error::AppError;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum JobStatus {
    Queued,
    Running,
    Done(ProcessingResult),
    Failed(String),
}

pub struct JobStore {
    jobs: RwLock<HashMap<Uuid, JobStatus>>,
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStore {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }

    pub async fn create(self: &Arc<Self>) -> Uuid {
        let id = Uuid::new_v4();
        self.jobs.write().await.insert(id, JobStatus::Queued);
        id
    }

    pub async fn mark_running(&self, id: Uuid) {
        self.jobs.write().await.insert(id, JobStatus::Running);
    }

    pub async fn mark_done(&self, id: Uuid, result: ProcessingResult) {
        self.jobs.write().await.insert(id, JobStatus::Done(result));
    }

    pub async fn mark_failed(&self, id: Uuid, err: &AppError) {
        self.jobs.write().await.insert(id, JobStatus::Failed(err.to_string()));
    }

    pub async fn get(&self, id: Uuid) -> Option<JobStatus> {
        self.jobs.read().await.get(&id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lifecycle_transitions_are_observable() {
        let store = Arc::new(JobStore::new());
        let id = store.create().await;
        assert!(matches!(store.get(id).await, Some(JobStatus::Queued)));

        store.mark_running(id).await;
        assert!(matches!(store.get(id).await, Some(JobStatus::Running)));

        store
            .mark_done(
                id,
                ProcessingResult {
                    article_id: "a".to_string(),
                    url: "https://example.com".to_string(),
                    summary: Summary {
                        article_id: "a".to_string(),
                        summary: "summary text".to_string(),
                        key_points: vec!["point".to_string()],
                        embedding: vec![0.1, 0.2],
                        embedding_model: "test-model".to_string(),
                        created_at: chrono::Utc::now(),
                    },
                    questions: Vec::new(),
                    elapsed_ms: 10,
                    warnings: Vec::new(),
                },
            )
            .await;
        assert!(matches!(store.get(id).await, Some(JobStatus::Done(_))));
    }

    #[tokio::test]
    async fn unknown_job_id_returns_none() {
        let store = JobStore::new();
        assert!(store.get(Uuid::new_v4()).await.is_none());
    }
}
