//! Job table, single writer path and the public job API.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use ripper_core::{
    AnalysisRequest, AppConfig, AssetStore, JobId, JobIssue, JobRecord, JobSnapshot, Phase,
    ProviderResolver, SourceCollaborator, TranscriptFetcher,
};
use ripper_infra::{JobRepository, TranscriptCache};

use crate::progress;
use crate::runner;
use crate::{Result, WorkflowError};

/// External collaborators shared by every job.
#[derive(Clone)]
pub struct Services {
    pub source: Arc<dyn SourceCollaborator>,
    pub fetcher: Arc<dyn TranscriptFetcher>,
    pub providers: Arc<dyn ProviderResolver>,
    pub assets: Arc<dyn AssetStore>,
    pub cache: Arc<TranscriptCache>,
}

struct JobEntry {
    record: JobRecord,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl JobEntry {
    fn idle(record: JobRecord) -> Self {
        Self {
            record,
            cancel: CancellationToken::new(),
            task: None,
        }
    }
}

/// State shared between the orchestrator handle and the job runners.
pub(crate) struct Shared {
    pub(crate) config: Arc<AppConfig>,
    pub(crate) services: Services,
    repo: Arc<dyn JobRepository>,
    jobs: Mutex<HashMap<JobId, JobEntry>>,
}

impl Shared {
    /// The only way job state changes.
    ///
    /// Applies `mutate` to a copy of the current record, checks the phase
    /// transition, keeps the percent from going backwards, persists the copy
    /// and only then makes it visible. A failed write leaves the persisted
    /// record untouched and flips the in-memory job to `error`.
    pub(crate) async fn commit<F>(&self, id: JobId, mutate: F) -> Result<JobRecord>
    where
        F: FnOnce(&mut JobRecord),
    {
        let mut jobs = self.jobs.lock().await;
        let entry = jobs.get_mut(&id).ok_or(WorkflowError::NotFound(id))?;
        let previous = &entry.record;
        if previous.is_terminal() {
            return Err(WorkflowError::NotRunning(id));
        }

        let mut next = previous.clone();
        mutate(&mut next);
        if next.phase != previous.phase && !previous.phase.can_transition_to(next.phase) {
            return Err(WorkflowError::InvalidTransition {
                from: previous.phase,
                to: next.phase,
            });
        }
        next.percent = progress::advance(previous.percent, next.percent);
        if let Some(start) = progress::phase_start(next.phase) {
            next.percent = progress::advance(next.percent, start);
        }
        next.updated_at = Utc::now();

        if let Err(e) = self.repo.save(&next).await {
            error!(job_id = %id, error = %e, "Failed to persist job state");
            let record = &mut entry.record;
            let message = format!("persistence failed: {}", e);
            record.errors.push(JobIssue::new(record.phase, message.clone()));
            record.phase = Phase::Error;
            record.message = message;
            record.updated_at = Utc::now();
            record.completed_at = Some(record.updated_at);
            entry.cancel.cancel();
            return Err(WorkflowError::Persistence(e));
        }

        if next.phase != previous.phase {
            info!(job_id = %id, from = %previous.phase, to = %next.phase, percent = next.percent, "Job phase changed");
        }
        entry.record = next.clone();
        Ok(next)
    }
}

/// Owns every job. Cheap to clone.
#[derive(Clone)]
pub struct JobOrchestrator {
    shared: Arc<Shared>,
}

impl JobOrchestrator {
    /// Load persisted jobs and mark the ones that were still running as
    /// interrupted. Nothing is resumed.
    pub async fn open(
        config: AppConfig,
        repo: Arc<dyn JobRepository>,
        services: Services,
    ) -> Result<Self> {
        let stored = repo.load_all().await?;
        let mut jobs = HashMap::with_capacity(stored.len());
        let mut interrupted = 0;

        for mut record in stored {
            if !record.is_terminal() {
                let phase = record.phase;
                let message = format!("interrupted: process restarted while job was {}", phase);
                record.errors.push(JobIssue::new(phase, message.clone()));
                record.phase = Phase::Error;
                record.message = message;
                record.updated_at = Utc::now();
                record.completed_at = Some(record.updated_at);
                repo.save(&record).await?;
                warn!(job_id = %record.id, phase = %phase, "Job was interrupted by a restart");
                interrupted += 1;
            }
            jobs.insert(record.id, JobEntry::idle(record));
        }

        info!(jobs = jobs.len(), interrupted, "Job orchestrator ready");
        Ok(Self {
            shared: Arc::new(Shared {
                config: Arc::new(config),
                services,
                repo,
                jobs: Mutex::new(jobs),
            }),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.shared.config
    }

    /// Validate the request, persist the job as `pending` and start it.
    pub async fn create(&self, request: AnalysisRequest) -> Result<JobId> {
        let request = request.normalized(&self.shared.config.pipeline)?;
        let provider = self.shared.services.providers.resolve(&request.model)?;

        let record = JobRecord::new(JobId::new(), request);
        let id = record.id;
        self.shared.repo.save(&record).await?;
        info!(
            job_id = %id,
            sources = record.request.sources.len(),
            items_per_source = record.request.items_per_source,
            model = %record.request.model,
            "Job created"
        );

        let cancel = CancellationToken::new();
        let mut jobs = self.shared.jobs.lock().await;
        jobs.insert(
            id,
            JobEntry {
                record,
                cancel: cancel.clone(),
                task: None,
            },
        );
        let task = tokio::spawn(runner::run(self.shared.clone(), id, provider, cancel));
        if let Some(entry) = jobs.get_mut(&id) {
            entry.task = Some(task);
        }
        Ok(id)
    }

    pub async fn status(&self, id: JobId) -> Result<JobSnapshot> {
        let jobs = self.shared.jobs.lock().await;
        jobs.get(&id)
            .map(|entry| entry.record.snapshot())
            .ok_or(WorkflowError::NotFound(id))
    }

    /// Full record including stage outputs.
    pub async fn result(&self, id: JobId) -> Result<JobRecord> {
        let jobs = self.shared.jobs.lock().await;
        jobs.get(&id)
            .map(|entry| entry.record.clone())
            .ok_or(WorkflowError::NotFound(id))
    }

    /// Request cancellation. The job moves to `aborted` once its runner
    /// reaches the next checkpoint.
    pub async fn abort(&self, id: JobId) -> Result<JobSnapshot> {
        {
            let jobs = self.shared.jobs.lock().await;
            let entry = jobs.get(&id).ok_or(WorkflowError::NotFound(id))?;
            if entry.record.is_terminal() {
                return Err(WorkflowError::NotRunning(id));
            }
            entry.cancel.cancel();
        }
        info!(job_id = %id, "Abort requested");

        let committed = self
            .shared
            .commit(id, |record| {
                record.abort_requested = true;
                record.message = "Abort requested".to_string();
            })
            .await;
        match committed {
            Ok(record) => Ok(record.snapshot()),
            // The runner got there first.
            Err(WorkflowError::NotRunning(_)) => self.status(id).await,
            Err(e) => Err(e),
        }
    }

    /// Jobs still running, oldest first.
    pub async fn list_active(&self) -> Vec<JobSnapshot> {
        let jobs = self.shared.jobs.lock().await;
        let mut active: Vec<JobSnapshot> = jobs
            .values()
            .filter(|entry| !entry.record.is_terminal())
            .map(|entry| entry.record.snapshot())
            .collect();
        active.sort_by_key(|s| s.created_at);
        active
    }

    /// Most recently created jobs, newest first.
    pub async fn list_recent(&self, limit: usize) -> Vec<JobSnapshot> {
        let jobs = self.shared.jobs.lock().await;
        let mut recent: Vec<JobSnapshot> = jobs.values().map(|entry| entry.record.snapshot()).collect();
        recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        recent.truncate(limit);
        recent
    }

    /// Wait for the job's runner to finish and return the final snapshot.
    pub async fn wait(&self, id: JobId) -> Result<JobSnapshot> {
        let task = {
            let mut jobs = self.shared.jobs.lock().await;
            jobs.get_mut(&id).ok_or(WorkflowError::NotFound(id))?.task.take()
        };
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(job_id = %id, error = %e, "Job task panicked");
            }
        }
        self.status(id).await
    }

    /// Drop finished jobs older than `max_age` from memory and disk.
    pub async fn cleanup_finished(&self, max_age: Duration) -> Result<usize> {
        let Some(cutoff) = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return Ok(0);
        };

        let expired: Vec<JobId> = {
            let mut jobs = self.shared.jobs.lock().await;
            let expired: Vec<JobId> = jobs
                .values()
                .filter(|entry| {
                    entry.record.is_terminal()
                        && entry.record.completed_at.unwrap_or(entry.record.updated_at) < cutoff
                })
                .map(|entry| entry.record.id)
                .collect();
            for id in &expired {
                jobs.remove(id);
            }
            expired
        };

        for id in &expired {
            self.shared.repo.delete(*id).await?;
        }
        if !expired.is_empty() {
            info!(removed = expired.len(), "Cleaned up finished jobs");
        }
        Ok(expired.len())
    }
}
