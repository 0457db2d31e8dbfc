//! Job table state management.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::AbortHandle;
use tracing::debug;
use uuid::Uuid;

use crate::accounts::Account;
use crate::actions::AccountAction;
use crate::telegram::mask_phone;

/// Identifier of a scheduled job.
pub type JobId = String;

/// Lifecycle of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Scheduled,
    Running,
    Succeeded,
    /// The account was already in the requested state.
    Skipped,
    Failed,
    TimedOut,
    Cancelled,
}

impl JobStatus {
    /// Whether the job will not change any more.
    #[must_use]
    pub const fn is_finished(self) -> bool {
        !matches!(self, Self::Scheduled | Self::Running)
    }
}

/// Errors returned by job table operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Job {id} is {status:?} and can no longer be cancelled")]
    NotCancellable { id: JobId, status: JobStatus },
}

/// What the API reports about a job.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: JobId,
    pub account_id: String,
    /// Masked phone number of the account.
    pub phone: String,
    pub action: AccountAction,
    pub channel_link: String,
    /// Offset from scheduling time.
    pub delay_ms: u64,
    pub fire_at: DateTime<Utc>,
    pub status: JobStatus,
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Creates a record for a job firing `delay` from now.
    #[must_use]
    pub fn new(account: &Account, channel_link: &str, action: AccountAction, delay: Duration) -> Self {
        let created_at = Utc::now();
        let fire_at = TimeDelta::from_std(delay)
            .ok()
            .and_then(|delta| created_at.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            id: Uuid::new_v4().to_string(),
            account_id: account.id.clone(),
            phone: mask_phone(&account.phone_number),
            action,
            channel_link: channel_link.to_owned(),
            delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            fire_at,
            status: JobStatus::Scheduled,
            detail: None,
            created_at,
            finished_at: None,
        }
    }
}

#[derive(Debug)]
struct JobEntry {
    record: JobRecord,
    abort: Option<AbortHandle>,
}

/// In-memory table of jobs, in scheduling order.
///
/// Finished records beyond `max_finished` are pruned, earliest scheduled
/// first. Nothing here survives a restart.
#[derive(Debug)]
pub struct JobTable {
    max_finished: usize,
    entries: RwLock<Vec<JobEntry>>,
}

impl JobTable {
    #[must_use]
    pub fn new(max_finished: usize) -> Self {
        Self {
            max_finished,
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Returns every job record.
    pub async fn list(&self) -> Vec<JobRecord> {
        self.entries
            .read()
            .await
            .iter()
            .map(|e| e.record.clone())
            .collect()
    }

    /// Looks a job up by id.
    pub async fn get(&self, id: &str) -> Option<JobRecord> {
        self.entries
            .read()
            .await
            .iter()
            .find(|e| e.record.id == id)
            .map(|e| e.record.clone())
    }

    /// Cancels a job that has not fired yet.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::NotFound`] for an unknown id and
    /// [`JobError::NotCancellable`] once the job has started.
    pub async fn cancel(&self, id: &str) -> Result<JobRecord, JobError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .iter_mut()
            .find(|e| e.record.id == id)
            .ok_or_else(|| JobError::NotFound(id.to_owned()))?;

        if entry.record.status != JobStatus::Scheduled {
            return Err(JobError::NotCancellable {
                id: id.to_owned(),
                status: entry.record.status,
            });
        }

        if let Some(abort) = entry.abort.take() {
            abort.abort();
        }
        entry.record.status = JobStatus::Cancelled;
        entry.record.finished_at = Some(Utc::now());
        let record = entry.record.clone();

        self.prune(&mut entries);
        Ok(record)
    }

    pub(crate) async fn insert(&self, record: JobRecord) {
        self.entries
            .write()
            .await
            .push(JobEntry { record, abort: None });
    }

    pub(crate) async fn attach(&self, id: &str, abort: AbortHandle) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.iter_mut().find(|e| e.record.id == id)
            && entry.record.status == JobStatus::Scheduled
        {
            entry.abort = Some(abort);
        }
    }

    /// Marks a job as running. Returns `false` if it was cancelled or pruned.
    pub(crate) async fn begin(&self, id: &str) -> bool {
        let mut entries = self.entries.write().await;
        match entries.iter_mut().find(|e| e.record.id == id) {
            Some(entry) if entry.record.status == JobStatus::Scheduled => {
                entry.record.status = JobStatus::Running;
                entry.abort = None;
                true
            }
            _ => false,
        }
    }

    pub(crate) async fn finish(&self, id: &str, status: JobStatus, detail: String) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.iter_mut().find(|e| e.record.id == id) {
            entry.record.status = status;
            entry.record.detail = Some(detail);
            entry.record.finished_at = Some(Utc::now());
        }
        self.prune(&mut entries);
    }

    /// Drops the earliest-finished records beyond `max_finished`.
    fn prune(&self, entries: &mut Vec<JobEntry>) {
        let mut finished: Vec<(DateTime<Utc>, usize)> = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.record.status.is_finished())
            .map(|(i, e)| (e.record.finished_at.unwrap_or(e.record.created_at), i))
            .collect();
        let excess = finished.len().saturating_sub(self.max_finished);
        if excess == 0 {
            return;
        }

        debug!("Pruning {} finished jobs", excess);
        finished.sort_unstable();
        let mut evicted: Vec<usize> = finished[..excess].iter().map(|&(_, i)| i).collect();
        evicted.sort_unstable();

        let mut idx = 0;
        entries.retain(|_| {
            let keep = evicted.binary_search(&idx).is_err();
            idx += 1;
            keep
        });
    }
}
