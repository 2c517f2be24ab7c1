//! Durable job boundary: delayed timers, the repeatable sweep, cancellation.
//!
//! Every timer the engine arms carries a stable identity string (session +
//! question, session + game-end, lobby countdown, or the single sweep
//! instance). Scheduling an identity that already has a pending job cancels
//! and replaces it, so retries and restarts can never stack duplicate timers.
//! Delivery is at-least-once: cancellation is best-effort and handlers must
//! treat late or duplicate firings as no-ops.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::RwLock;
use tracing::debug;
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::common::{LobbyId, QuestionId, SessionId};

// ============================================================================
// Job types and identities
// ============================================================================

pub const JOB_QUESTION_TIMEOUT: &str = "question_timeout";
pub const JOB_GAME_END: &str = "game_end";
pub const JOB_LOBBY_COUNTDOWN: &str = "lobby_countdown";
pub const JOB_MATCHMAKING_SWEEP: &str = "matchmaking_sweep";

/// Identity for a per-question timer: one per (session, question).
pub fn question_timeout_identity(session_id: SessionId, question_id: QuestionId) -> String {
    format!("question_timeout:{}:{}", session_id, question_id)
}

/// Identity for a session's game-end timer.
pub fn game_end_identity(session_id: SessionId) -> String {
    format!("game_end:{}", session_id)
}

/// Identity for a lobby's countdown. One per lobby; re-initiating the
/// countdown replaces the previous job.
pub fn lobby_countdown_identity(lobby_id: LobbyId) -> String {
    format!("lobby_countdown:{}", lobby_id)
}

/// The single logical sweep instance. Registering it again (e.g. after a
/// restart) replaces any previous sweeper instead of adding a second one.
pub const MATCHMAKING_SWEEP_IDENTITY: &str = "matchmaking_sweep:singleton";

// ============================================================================
// Job model
// ============================================================================

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EngineJob {
    pub id: Uuid,
    pub job_type: String,
    pub identity: String,
    pub args: serde_json::Value,
    pub status: String,
    pub run_at: DateTime<Utc>,
    pub repeat_secs: Option<i64>,
    pub attempts: i32,
    pub max_retries: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Options for scheduling a job.
#[derive(Clone, Debug, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct ScheduleOptions {
    /// Job type (must match a handler in the router).
    pub job_type: String,
    /// Stable identity. At most one pending job exists per identity.
    pub identity: String,
    /// Handler arguments, serialized as JSON.
    #[builder(default = serde_json::Value::Null)]
    pub args: serde_json::Value,
    /// When to fire. `None` fires as soon as a runner polls.
    #[builder(default)]
    pub run_at: Option<DateTime<Utc>>,
    /// Repeat interval for repeatable jobs.
    #[builder(default)]
    pub repeat_secs: Option<i64>,
    /// Retry ceiling before the job is parked as dead-letter.
    #[builder(default = 3)]
    pub max_retries: i32,
}

impl ScheduleOptions {
    /// One-shot job firing after a delay.
    pub fn delayed(
        job_type: impl Into<String>,
        identity: impl Into<String>,
        args: serde_json::Value,
        run_at: DateTime<Utc>,
    ) -> Self {
        Self::builder()
            .job_type(job_type)
            .identity(identity)
            .args(args)
            .run_at(Some(run_at))
            .build()
    }

    /// Repeatable job with a fixed interval.
    pub fn repeating(
        job_type: impl Into<String>,
        identity: impl Into<String>,
        interval_secs: i64,
    ) -> Self {
        Self::builder()
            .job_type(job_type)
            .identity(identity)
            .repeat_secs(Some(interval_secs))
            .build()
    }
}

// ============================================================================
// Queue boundary
// ============================================================================

/// Trait for the durable job queue consumed by the engine.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Schedule a job, replacing any live job with the same identity.
    async fn schedule(&self, options: ScheduleOptions) -> Result<EngineJob>;

    /// Cancel the pending job with this identity if one exists. Best-effort:
    /// a job mid-flight may still fire after cancellation.
    async fn cancel(&self, identity: &str) -> Result<bool>;
}

/// Postgres-backed job queue. Rows in `engine_jobs` are the source of truth;
/// the [`JobRunner`](super::job_runner::JobRunner) polls and executes them.
pub struct PostgresJobQueue {
    db: PgPool,
}

impl PostgresJobQueue {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl JobQueue for PostgresJobQueue {
    async fn schedule(&self, options: ScheduleOptions) -> Result<EngineJob> {
        let mut tx = self.db.begin().await?;

        // Replace-on-reschedule: an identity has at most one live job.
        sqlx::query(
            r#"
            UPDATE engine_jobs
            SET status = 'cancelled', updated_at = NOW()
            WHERE identity = $1
              AND status IN ('pending', 'running')
            "#,
        )
        .bind(&options.identity)
        .execute(&mut *tx)
        .await?;

        let job = sqlx::query_as::<_, EngineJob>(
            r#"
            INSERT INTO engine_jobs (id, job_type, identity, args, status, run_at, repeat_secs, max_retries)
            VALUES ($1, $2, $3, $4, 'pending', $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&options.job_type)
        .bind(&options.identity)
        .bind(&options.args)
        .bind(options.run_at.unwrap_or_else(Utc::now))
        .bind(options.repeat_secs)
        .bind(options.max_retries)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            job_id = %job.id,
            job_type = %job.job_type,
            identity = %job.identity,
            run_at = %job.run_at,
            "Scheduled job"
        );
        Ok(job)
    }

    async fn cancel(&self, identity: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE engine_jobs
            SET status = 'cancelled', updated_at = NOW()
            WHERE identity = $1
              AND status = 'pending'
            "#,
        )
        .bind(identity)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

// ============================================================================
// Test queue
// ============================================================================

/// In-memory job queue that records scheduling for inspection in tests.
/// Nothing executes; tests fire handlers directly.
#[derive(Default)]
pub struct TestJobQueue {
    jobs: RwLock<Vec<EngineJob>>,
    cancelled: RwLock<Vec<String>>,
}

impl TestJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// All live (pending) jobs.
    pub fn jobs(&self) -> Vec<EngineJob> {
        self.jobs.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn job_for_identity(&self, identity: &str) -> Option<EngineJob> {
        self.jobs()
            .into_iter()
            .find(|j| j.identity == identity)
    }

    pub fn was_scheduled(&self, identity: &str) -> bool {
        self.job_for_identity(identity).is_some()
    }

    pub fn jobs_of_type(&self, job_type: &str) -> Vec<EngineJob> {
        self.jobs()
            .into_iter()
            .filter(|j| j.job_type == job_type)
            .collect()
    }

    /// Identities whose cancellation was requested.
    pub fn cancelled_identities(&self) -> Vec<String> {
        self.cancelled
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn clear(&self) {
        self.jobs.write().unwrap_or_else(|e| e.into_inner()).clear();
        self.cancelled
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

#[async_trait]
impl JobQueue for TestJobQueue {
    async fn schedule(&self, options: ScheduleOptions) -> Result<EngineJob> {
        let now = Utc::now();
        let job = EngineJob {
            id: Uuid::new_v4(),
            job_type: options.job_type,
            identity: options.identity,
            args: options.args,
            status: "pending".to_string(),
            run_at: options.run_at.unwrap_or(now),
            repeat_secs: options.repeat_secs,
            attempts: 0,
            max_retries: options.max_retries,
            last_error: None,
            created_at: now,
            updated_at: now,
        };

        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        jobs.retain(|j| j.identity != job.identity);
        jobs.push(job.clone());
        Ok(job)
    }

    async fn cancel(&self, identity: &str) -> Result<bool> {
        self.cancelled
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(identity.to_string());

        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        let before = jobs.len();
        jobs.retain(|j| j.identity != identity);
        Ok(jobs.len() < before)
    }
}
