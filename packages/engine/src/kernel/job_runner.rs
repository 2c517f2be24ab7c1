//! Job runner: polls due jobs and executes them.
//!
//! Multiple runner processes may poll the same table; `FOR UPDATE SKIP
//! LOCKED` makes each claim exclusive without coordination. Failed handlers
//! retry with exponential backoff up to the job's retry ceiling, then park as
//! dead-letter for inspection. Repeatable jobs re-arm themselves after each
//! successful run.

use anyhow::Result;
use chrono::{Duration, Utc};
use tracing::{debug, error, info, warn};

use crate::error::EngineError;
use crate::kernel::deps::EngineDeps;
use crate::kernel::jobs::EngineJob;
use crate::kernel::router;

/// Backoff ceiling between retries of one job.
const MAX_BACKOFF_SECS: i64 = 60;

pub struct JobRunner {
    deps: EngineDeps,
    batch_size: i64,
}

impl JobRunner {
    pub fn new(deps: EngineDeps) -> Self {
        Self {
            deps,
            batch_size: 16,
        }
    }

    /// Run the polling loop until the process stops.
    pub async fn run(self) -> Result<()> {
        let poll = std::time::Duration::from_millis(self.deps.config.job_poll_interval_ms);
        info!(poll_ms = self.deps.config.job_poll_interval_ms, "Job runner started");

        loop {
            match self.tick().await {
                Ok(0) => tokio::time::sleep(poll).await,
                Ok(n) => debug!(executed = n, "Job batch complete"),
                Err(e) => {
                    error!("Job poll failed: {}", e);
                    tokio::time::sleep(poll).await;
                }
            }
        }
    }

    /// Claim and execute one batch of due jobs. Returns how many ran.
    /// Exposed separately so tests can drive the runner deterministically.
    pub async fn tick(&self) -> Result<usize> {
        self.reclaim_stale().await?;
        let jobs = self.claim_due().await?;
        let count = jobs.len();

        for job in jobs {
            self.execute(job).await?;
        }
        Ok(count)
    }

    /// Return jobs whose lease ran out to the pending pool. A worker that
    /// died mid-execution leaves its claim stuck in `running`; re-running the
    /// handler is safe because every handler is idempotent.
    async fn reclaim_stale(&self) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE engine_jobs
            SET status = 'pending', updated_at = NOW()
            WHERE status = 'running'
              AND updated_at < NOW() - ($1 * INTERVAL '1 second')
            "#,
        )
        .bind(self.deps.config.job_lease_secs)
        .execute(&self.deps.db_pool)
        .await?;

        if result.rows_affected() > 0 {
            warn!(reclaimed = result.rows_affected(), "Reclaimed jobs from dead workers");
        }
        Ok(())
    }

    /// Claim a batch of due jobs, skipping rows other workers hold.
    async fn claim_due(&self) -> Result<Vec<EngineJob>> {
        let jobs = sqlx::query_as::<_, EngineJob>(
            r#"
            UPDATE engine_jobs
            SET status = 'running', updated_at = NOW()
            WHERE id IN (
                SELECT id FROM engine_jobs
                WHERE status = 'pending' AND run_at <= NOW()
                ORDER BY run_at
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(self.batch_size)
        .fetch_all(&self.deps.db_pool)
        .await?;

        Ok(jobs)
    }

    async fn execute(&self, job: EngineJob) -> Result<()> {
        debug!(job_id = %job.id, job_type = %job.job_type, identity = %job.identity, "Executing job");

        match router::dispatch(&self.deps, &job).await {
            Ok(()) => self.complete(&job).await,
            Err(e) if e.is_retryable() && job.attempts + 1 <= job.max_retries => {
                self.retry(&job, &e).await
            }
            Err(e) => self.dead_letter(&job, &e).await,
        }
    }

    /// Mark a finished job succeeded, or re-arm it if repeatable. Guarded on
    /// `status = 'running'` so a job cancelled mid-flight stays cancelled.
    async fn complete(&self, job: &EngineJob) -> Result<()> {
        if let Some(interval) = job.repeat_secs {
            sqlx::query(
                r#"
                UPDATE engine_jobs
                SET status = 'pending', run_at = $2, attempts = 0, updated_at = NOW()
                WHERE id = $1 AND status = 'running'
                "#,
            )
            .bind(job.id)
            .bind(Utc::now() + Duration::seconds(interval))
            .execute(&self.deps.db_pool)
            .await?;
        } else {
            sqlx::query(
                r#"
                UPDATE engine_jobs
                SET status = 'succeeded', updated_at = NOW()
                WHERE id = $1 AND status = 'running'
                "#,
            )
            .bind(job.id)
            .execute(&self.deps.db_pool)
            .await?;
        }
        Ok(())
    }

    async fn retry(&self, job: &EngineJob, err: &EngineError) -> Result<()> {
        let attempts = job.attempts + 1;
        let backoff = Duration::seconds((1i64 << attempts.min(6)).min(MAX_BACKOFF_SECS));

        debug!(job_id = %job.id, attempts, "Job failed, retrying: {}", err);

        sqlx::query(
            r#"
            UPDATE engine_jobs
            SET status = 'pending', attempts = $2, run_at = $3, last_error = $4, updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(job.id)
        .bind(attempts)
        .bind(Utc::now() + backoff)
        .bind(err.to_string())
        .execute(&self.deps.db_pool)
        .await?;
        Ok(())
    }

    async fn dead_letter(&self, job: &EngineJob, err: &EngineError) -> Result<()> {
        error!(job_id = %job.id, job_type = %job.job_type, "Job parked as dead-letter: {}", err);

        sqlx::query(
            r#"
            UPDATE engine_jobs
            SET status = 'dead_letter', attempts = attempts + 1, last_error = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(job.id)
        .bind(err.to_string())
        .execute(&self.deps.db_pool)
        .await?;
        Ok(())
    }
}
