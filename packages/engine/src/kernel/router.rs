//! Maps fired jobs to their domain handlers.
//!
//! Job args are plain JSON; each arm deserializes its own payload struct and
//! calls into the owning domain. Handlers are idempotent against duplicate
//! and late firings (they re-check persisted state before mutating), so the
//! at-least-once queue underneath never needs exactly-once delivery.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::common::{LobbyId, QuestionId, SessionId};
use crate::domains::{lobbies, matchmaking, sessions};
use crate::error::EngineResult;
use crate::kernel::deps::EngineDeps;
use crate::kernel::jobs::{
    self, EngineJob, ScheduleOptions, JOB_GAME_END, JOB_LOBBY_COUNTDOWN, JOB_MATCHMAKING_SWEEP,
    JOB_QUESTION_TIMEOUT, MATCHMAKING_SWEEP_IDENTITY,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionTimeoutArgs {
    pub session_id: SessionId,
    pub question_id: QuestionId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameEndArgs {
    pub session_id: SessionId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LobbyCountdownArgs {
    pub lobby_id: LobbyId,
}

/// Dispatch one fired job to its handler.
pub async fn dispatch(deps: &EngineDeps, job: &EngineJob) -> EngineResult<()> {
    match job.job_type.as_str() {
        JOB_QUESTION_TIMEOUT => {
            let args: QuestionTimeoutArgs =
                serde_json::from_value(job.args.clone()).map_err(anyhow::Error::from)?;
            sessions::orchestrator::handle_question_timeout(deps, args.session_id, args.question_id)
                .await
        }
        JOB_GAME_END => {
            let args: GameEndArgs =
                serde_json::from_value(job.args.clone()).map_err(anyhow::Error::from)?;
            sessions::orchestrator::handle_game_end(deps, args.session_id).await
        }
        JOB_LOBBY_COUNTDOWN => {
            let args: LobbyCountdownArgs =
                serde_json::from_value(job.args.clone()).map_err(anyhow::Error::from)?;
            lobbies::actions::handle_countdown_fired(deps, args.lobby_id).await
        }
        JOB_MATCHMAKING_SWEEP => matchmaking::sweep::run_sweep(deps).await,
        unknown => {
            // A job type nothing registered is a deploy-skew artifact, not a
            // reason to retry forever.
            warn!(job_id = %job.id, job_type = %unknown, "Dropping job with unknown type");
            Ok(())
        }
    }
}

/// Register the single repeatable matchmaking sweep. Replace-on-reschedule
/// in the queue guarantees at most one live sweeper even across restarts.
pub async fn register_sweep(deps: &EngineDeps) -> EngineResult<()> {
    deps.jobs
        .schedule(ScheduleOptions::repeating(
            JOB_MATCHMAKING_SWEEP,
            MATCHMAKING_SWEEP_IDENTITY,
            deps.config.sweep_interval_secs,
        ))
        .await?;
    Ok(())
}

/// Arm a session's game-end timer.
pub async fn schedule_game_end(deps: &EngineDeps, session_id: SessionId, duration_secs: i32) -> EngineResult<()> {
    deps.jobs
        .schedule(ScheduleOptions::delayed(
            JOB_GAME_END,
            jobs::game_end_identity(session_id),
            serde_json::to_value(GameEndArgs { session_id }).map_err(anyhow::Error::from)?,
            chrono::Utc::now() + chrono::Duration::seconds(duration_secs as i64),
        ))
        .await?;
    Ok(())
}

/// Arm the per-question timer for a fastest-finger round.
pub async fn schedule_question_timeout(
    deps: &EngineDeps,
    session_id: SessionId,
    question_id: QuestionId,
    budget_secs: i32,
) -> EngineResult<()> {
    deps.jobs
        .schedule(ScheduleOptions::delayed(
            JOB_QUESTION_TIMEOUT,
            jobs::question_timeout_identity(session_id, question_id),
            serde_json::to_value(QuestionTimeoutArgs {
                session_id,
                question_id,
            })
            .map_err(anyhow::Error::from)?,
            chrono::Utc::now() + chrono::Duration::seconds(budget_secs as i64),
        ))
        .await?;
    Ok(())
}
