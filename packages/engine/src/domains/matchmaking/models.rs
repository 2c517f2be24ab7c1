//! Waiting-pool entries.
//!
//! The pool is rows in the shared store, not an in-process collection, so any
//! worker can pair concurrently. Claiming a candidate uses `FOR UPDATE SKIP
//! LOCKED`: two workers pairing at once simply never see each other's rows.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgExecutor};

use crate::common::{CategoryId, GameMode, ModeParams, UserId, WaitingEntryId};
use crate::error::{EngineError, EngineResult};

/// One not-yet-matched matchmaking request. Lives only in the pool; removed
/// on pairing or by the timeout sweep.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WaitingEntry {
    pub id: WaitingEntryId,
    pub user_id: UserId,
    pub mode: String,
    pub duration_secs: i32,
    pub skill_rating: i32,
    pub question_time_secs: Option<i32>,
    pub category_id: Option<CategoryId>,
    pub difficulty: Option<i32>,
    pub tolerance: i32,
    pub sweep_ticks: i32,
    pub enqueued_at: DateTime<Utc>,
}

impl WaitingEntry {
    pub fn mode_params(&self) -> ModeParams {
        ModeParams {
            question_time_secs: self.question_time_secs,
            category_id: self.category_id,
            difficulty: self.difficulty,
        }
    }

    /// Insert a fresh pool entry. The one-entry-per-user constraint lives in
    /// the store; losing an insert race against a concurrent request for the
    /// same user surfaces as `AlreadyQueued`, the same answer the unlocked
    /// pre-check would have given.
    pub async fn insert(
        user_id: UserId,
        mode: GameMode,
        duration_secs: i32,
        skill_rating: i32,
        params: &ModeParams,
        tolerance: i32,
        executor: impl PgExecutor<'_>,
    ) -> EngineResult<Self> {
        let entry = sqlx::query_as::<_, WaitingEntry>(
            r#"
            INSERT INTO waiting_pool
                (id, user_id, mode, duration_secs, skill_rating, question_time_secs, category_id, difficulty, tolerance)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(WaitingEntryId::new())
        .bind(user_id)
        .bind(mode.to_string())
        .bind(duration_secs)
        .bind(skill_rating)
        .bind(params.question_time_secs)
        .bind(params.category_id)
        .bind(params.difficulty)
        .bind(tolerance)
        .fetch_one(executor)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                EngineError::AlreadyQueued
            }
            other => EngineError::Store(other),
        })?;
        Ok(entry)
    }

    pub async fn find_by_user(
        user_id: UserId,
        executor: impl PgExecutor<'_>,
    ) -> Result<Option<Self>> {
        let entry =
            sqlx::query_as::<_, WaitingEntry>("SELECT * FROM waiting_pool WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(executor)
                .await?;
        Ok(entry)
    }

    /// Claim the closest compatible entry for a prospective opponent and
    /// remove it from the pool, all inside the caller's transaction. The
    /// distance must fit inside both sides' tolerance bands. Rows another
    /// worker is claiming are skipped, not waited on.
    pub async fn claim_compatible(
        mode: GameMode,
        duration_secs: i32,
        skill_rating: i32,
        entrant_tolerance: i32,
        exclude_user: UserId,
        conn: &mut PgConnection,
    ) -> Result<Option<Self>> {
        let candidate = sqlx::query_as::<_, WaitingEntry>(
            r#"
            SELECT * FROM waiting_pool
            WHERE mode = $1
              AND duration_secs = $2
              AND user_id <> $3
              AND ABS(skill_rating - $4) <= LEAST(tolerance, $5)
            ORDER BY ABS(skill_rating - $4), enqueued_at
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(mode.to_string())
        .bind(duration_secs)
        .bind(exclude_user)
        .bind(skill_rating)
        .bind(entrant_tolerance)
        .fetch_optional(&mut *conn)
        .await?;

        if let Some(ref entry) = candidate {
            sqlx::query("DELETE FROM waiting_pool WHERE id = $1")
                .bind(entry.id)
                .execute(&mut *conn)
                .await?;
        }
        Ok(candidate)
    }

    /// Lock the oldest entry not yet visited in this sweep pass.
    pub async fn lock_oldest_excluding(
        visited: &[WaitingEntryId],
        conn: &mut PgConnection,
    ) -> Result<Option<Self>> {
        let entry = sqlx::query_as::<_, WaitingEntry>(
            r#"
            SELECT * FROM waiting_pool
            WHERE id <> ALL($1)
            ORDER BY enqueued_at
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(visited)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(entry)
    }

    pub async fn delete_by_id(id: WaitingEntryId, executor: impl PgExecutor<'_>) -> Result<()> {
        sqlx::query("DELETE FROM waiting_pool WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;
        Ok(())
    }

    /// Widen tolerance for every entry that has waited at least one sweep
    /// interval. Returns how many rows were widened.
    pub async fn widen_stale(
        tolerance_step: i32,
        waited_since: DateTime<Utc>,
        executor: impl PgExecutor<'_>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE waiting_pool
            SET sweep_ticks = sweep_ticks + 1, tolerance = tolerance + $1
            WHERE enqueued_at <= $2
            "#,
        )
        .bind(tolerance_step)
        .bind(waited_since)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    /// Remove entries past the hard wait ceiling, returning them so the
    /// sweep can signal each requester.
    pub async fn expire(
        max_sweep_ticks: i32,
        executor: impl PgExecutor<'_>,
    ) -> Result<Vec<Self>> {
        let expired = sqlx::query_as::<_, WaitingEntry>(
            "DELETE FROM waiting_pool WHERE sweep_ticks >= $1 RETURNING *",
        )
        .bind(max_sweep_ticks)
        .fetch_all(executor)
        .await?;
        Ok(expired)
    }
}
