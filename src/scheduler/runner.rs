//! Staggered job runner.
//!
//! Every job is an independent task:
//! 1. Sleep until the fire time
//! 2. Flip `scheduled` to `running` (a cancelled job stops here)
//! 3. Execute the action for its account
//! 4. Record the outcome in the job table
//!
//! Reciprocal jobs are registered up front with their own offsets, so they
//! fire whether or not the originating job succeeded.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use super::state::{JobId, JobRecord, JobStatus, JobTable};
use crate::accounts::Account;
use crate::actions::{AccountAction, ActionError, ActionExecutor, ActionOutcome};

/// Offsets past this are parked here; such jobs stay cancellable.
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 86_400);

/// Second action that undoes the first after a fixed delay.
#[derive(Debug, Clone, Copy)]
pub struct Reciprocal {
    pub action: AccountAction,
    pub delay: Duration,
}

/// One action spread over many accounts.
#[derive(Debug, Clone)]
pub struct StaggerPlan {
    /// Accounts in firing order.
    pub accounts: Vec<Account>,
    pub channel_link: String,
    pub action: AccountAction,
    /// Offset of the first job.
    pub start: Duration,
    /// Gap between consecutive accounts.
    pub interval: Duration,
    pub reciprocal: Option<Reciprocal>,
}

/// Registers jobs in the table and spawns their tasks.
#[derive(Clone)]
pub struct JobRunner {
    jobs: Arc<JobTable>,
    executor: Arc<ActionExecutor>,
}

impl JobRunner {
    #[must_use]
    pub fn new(jobs: Arc<JobTable>, executor: Arc<ActionExecutor>) -> Self {
        Self { jobs, executor }
    }

    /// Schedules account `i` at `start + i * interval`, plus its reciprocal
    /// at that offset plus the reciprocal delay.
    pub async fn schedule_staggered(&self, plan: StaggerPlan) -> Vec<JobId> {
        let base = Instant::now();
        let mut ids = Vec::with_capacity(plan.accounts.len() * 2);

        for (i, account) in plan.accounts.iter().enumerate() {
            let step = u32::try_from(i).unwrap_or(u32::MAX);
            let offset = plan.start.saturating_add(plan.interval.saturating_mul(step));

            ids.push(
                self.spawn_job(base, account.clone(), &plan.channel_link, plan.action, offset)
                    .await,
            );

            if let Some(reciprocal) = plan.reciprocal {
                ids.push(
                    self.spawn_job(
                        base,
                        account.clone(),
                        &plan.channel_link,
                        reciprocal.action,
                        offset.saturating_add(reciprocal.delay),
                    )
                    .await,
                );
            }
        }

        info!(
            "Scheduled {} {} jobs for {} accounts on {} (every {}s)",
            ids.len(),
            plan.action,
            plan.accounts.len(),
            plan.channel_link,
            plan.interval.as_secs()
        );
        ids
    }

    /// Schedules a single job `delay` from now.
    pub async fn schedule_at(
        &self,
        account: Account,
        channel_link: &str,
        action: AccountAction,
        delay: Duration,
    ) -> JobId {
        self.spawn_job(Instant::now(), account, channel_link, action, delay)
            .await
    }

    /// Gets a reference to the job table.
    #[must_use]
    pub fn jobs(&self) -> &Arc<JobTable> {
        &self.jobs
    }

    async fn spawn_job(
        &self,
        base: Instant,
        account: Account,
        channel_link: &str,
        action: AccountAction,
        offset: Duration,
    ) -> JobId {
        let record = JobRecord::new(&account, channel_link, action, offset);
        let id = record.id.clone();
        self.jobs.insert(record).await;

        let jobs = Arc::clone(&self.jobs);
        let executor = Arc::clone(&self.executor);
        let link = channel_link.to_owned();
        let job_id = id.clone();
        let fire_at = base.checked_add(offset.min(FAR_FUTURE));

        let handle = tokio::spawn(async move {
            match fire_at {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }

            if !jobs.begin(&job_id).await {
                debug!("Job {} no longer scheduled, not running it", job_id);
                return;
            }

            let (status, detail) = match executor.execute(&account, &link, action).await {
                Ok(ActionOutcome::Done(detail)) => (JobStatus::Succeeded, detail),
                Ok(ActionOutcome::Skipped(detail)) => (JobStatus::Skipped, detail),
                Err(e @ ActionError::Timeout { .. }) => (JobStatus::TimedOut, e.to_string()),
                Err(e) => (JobStatus::Failed, e.to_string()),
            };
            jobs.finish(&job_id, status, detail).await;
        });

        self.jobs.attach(&id, handle.abort_handle()).await;
        id
    }
}

impl std::fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRunner")
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}
