use crate::{
    audit::remove_report,
    models::{ApiError, AuditResponse, Submission},
    pipeline::Pipeline,
};
use serde::Serialize;
use std::{
    collections::HashMap,
    path::Path,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tracing::{debug, warn};
use uuid::Uuid;

pub const DEFAULT_RETENTION_SECS: u64 = 3600;

/// Background audits drained by a single worker, so two runs never overlap.
/// Finished jobs are kept for `retention`, or until their report is
/// downloaded, then dropped together with their artifact.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    store: JobStore,
}

#[derive(Clone)]
struct JobStore {
    statuses: Arc<Mutex<HashMap<Uuid, JobEntry>>>,
    retention: Duration,
}

struct Job {
    id: Uuid,
    submission: Submission,
}

struct JobEntry {
    state: JobState,
    finished_at: Option<Instant>,
}

impl JobEntry {
    fn new(state: JobState) -> Self {
        let finished_at = match state {
            JobState::Completed { .. } | JobState::Failed { .. } => Some(Instant::now()),
            JobState::Queued | JobState::Running => None,
        };
        Self { state, finished_at }
    }
}

#[derive(Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed { result: AuditResponse },
    Failed { error: String, stage: Option<String> },
}

#[derive(Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    #[serde(flatten)]
    pub state: JobState,
}

impl JobQueue {
    pub fn spawn(pipeline: Pipeline) -> (Self, JoinHandle<()>) {
        Self::with_retention(pipeline, retention_from_env())
    }

    pub fn with_retention(pipeline: Pipeline, retention: Duration) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Job>(queue_capacity_from_env());
        let store = JobStore {
            statuses: Arc::new(Mutex::new(HashMap::new())),
            retention,
        };
        let worker = store.clone();

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                worker.set_state(job.id, JobState::Running).await;

                let state = match pipeline.run(job.submission).await {
                    Ok(resp) => JobState::Completed { result: resp },
                    Err(err) => {
                        warn!(target: "audit.jobs", job_id = %job.id, error = %err, "audit_job_failed");
                        JobState::Failed {
                            error: err.detail().to_string(),
                            stage: Some(err.stage().to_string()),
                        }
                    }
                };
                worker.set_state(job.id, state).await;
                worker.sweep(Instant::now()).await;
            }
        });

        (Self { tx, store }, handle)
    }

    pub async fn enqueue(&self, submission: Submission) -> Result<Uuid, ApiError> {
        self.store.sweep(Instant::now()).await;
        let id = Uuid::new_v4();
        self.store.set_state(id, JobState::Queued).await;
        let job = Job { id, submission };
        if self.tx.send(job).await.is_err() {
            self.store.statuses.lock().await.remove(&id);
            return Err(ApiError {
                error: "queue_send_failed".into(),
                detail: Some("worker not available".into()),
            });
        }
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> Option<JobInfo> {
        self.store.sweep(Instant::now()).await;
        let guard = self.store.statuses.lock().await;
        guard.get(&id).map(|entry| JobInfo {
            id: id.to_string(),
            state: entry.state.clone(),
        })
    }

    /// Artifact path of a completed job.
    pub async fn report_path(&self, id: Uuid) -> Option<String> {
        self.store.sweep(Instant::now()).await;
        let guard = self.store.statuses.lock().await;
        match guard.get(&id).map(|entry| &entry.state) {
            Some(JobState::Completed { result }) => Some(result.report_path.clone()),
            _ => None,
        }
    }

    /// Forgets a job after its report was delivered and deletes the artifact.
    pub async fn release(&self, id: Uuid) {
        let removed = self.store.statuses.lock().await.remove(&id);
        if let Some(entry) = removed {
            discard_artifact(id, entry.state).await;
        }
    }
}

impl JobStore {
    async fn set_state(&self, id: Uuid, state: JobState) {
        self.statuses.lock().await.insert(id, JobEntry::new(state));
    }

    /// Drops every job that finished at least `retention` before `now`.
    async fn sweep(&self, now: Instant) {
        let expired: Vec<(Uuid, JobState)> = {
            let mut guard = self.statuses.lock().await;
            let ids: Vec<Uuid> = guard
                .iter()
                .filter(|(_, entry)| {
                    entry
                        .finished_at
                        .is_some_and(|at| now.saturating_duration_since(at) >= self.retention)
                })
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| guard.remove(&id).map(|entry| (id, entry.state)))
                .collect()
        };
        for (id, state) in expired {
            debug!(target: "audit.jobs", job_id = %id, "audit_job_expired");
            discard_artifact(id, state).await;
        }
    }
}

async fn discard_artifact(id: Uuid, state: JobState) {
    if let JobState::Completed { result } = state
        && let Err(err) = remove_report(Path::new(&result.report_path)).await
    {
        warn!(target: "audit.jobs", job_id = %id, error = %err, "report_cleanup_failed");
    }
}

fn queue_capacity_from_env() -> usize {
    std::env::var("QUEUE_CAPACITY")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(64)
}

fn retention_from_env() -> Duration {
    let secs = std::env::var("JOB_RETENTION_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETENTION_SECS);
    Duration::from_secs(secs)
}
