//! Matchmaking entry points.

use serde_json::json;
use tracing::info;

use crate::common::{GameMode, ModeParams, SessionStatus, UserId};
use crate::domains::matchmaking::models::WaitingEntry;
use crate::domains::sessions::models::{GameSession, Participant};
use crate::domains::sessions::orchestrator;
use crate::error::{EngineError, EngineResult};
use crate::kernel::deps::EngineDeps;
use crate::kernel::gateway::Address;

/// What `request_match` resolved to. Solo modes never touch the pool.
#[derive(Debug)]
pub enum MatchOutcome {
    /// Paired immediately with a waiting opponent.
    Matched {
        session: GameSession,
        participants: Vec<Participant>,
    },
    /// No compatible opponent yet; the request now waits in the pool.
    Queued { entry: WaitingEntry },
    /// A single-player session started straight away.
    SoloStarted {
        session: GameSession,
        participant: Participant,
    },
}

/// Handle a matchmaking request.
///
/// Multiplayer modes attempt an immediate claim of the closest compatible
/// pool entry; claim, entry removal, and session creation share one
/// transaction so a concurrent request cannot pair against the same entry.
/// On a miss the requester is enqueued instead.
pub async fn request_match(
    deps: &EngineDeps,
    user_id: UserId,
    mode: GameMode,
    duration_secs: i32,
    skill_rating: i32,
    params: &ModeParams,
) -> EngineResult<MatchOutcome> {
    if mode.is_solo() {
        let (session, participant) =
            orchestrator::start_solo(deps, user_id, mode, duration_secs, params).await?;
        return Ok(MatchOutcome::SoloStarted {
            session,
            participant,
        });
    }

    let mut tx = deps.db_pool.begin().await?;

    if WaitingEntry::find_by_user(user_id, &mut *tx).await?.is_some() {
        return Err(EngineError::AlreadyQueued);
    }
    if Participant::user_in_live_session(user_id, &mut *tx).await? {
        return Err(EngineError::AlreadyInSession);
    }

    let entrant_tolerance = deps.config.base_tolerance;
    let claimed = WaitingEntry::claim_compatible(
        mode,
        duration_secs,
        skill_rating,
        entrant_tolerance,
        user_id,
        &mut *tx,
    )
    .await?;

    match claimed {
        Some(opponent) => {
            let params = merge_params(&opponent.mode_params(), params);
            let (session, participants) = orchestrator::create_session_tx(
                &mut *tx,
                &deps.config,
                mode,
                duration_secs,
                &params,
                &[opponent.user_id, user_id],
                SessionStatus::Active,
            )
            .await?;
            tx.commit().await?;

            info!(
                session_id = %session.id,
                user_id = %user_id,
                opponent_id = %opponent.user_id,
                "matched from waiting pool"
            );

            announce_match(deps, &session, &participants).await?;
            orchestrator::arm_session_timers(deps, &session).await?;
            orchestrator::emit_opening_questions(deps, &session, &participants).await?;

            Ok(MatchOutcome::Matched {
                session,
                participants,
            })
        }
        None => {
            let entry = WaitingEntry::insert(
                user_id,
                mode,
                duration_secs,
                skill_rating,
                params,
                entrant_tolerance,
                &mut *tx,
            )
            .await?;
            tx.commit().await?;

            info!(user_id = %user_id, mode = %mode, "enqueued in waiting pool");
            Ok(MatchOutcome::Queued { entry })
        }
    }
}

/// Drop a still-waiting request. A no-op when the entry was already claimed
/// or expired, so cancellation racing a pairing never errors.
pub async fn cancel_request(deps: &EngineDeps, user_id: UserId) -> EngineResult<()> {
    let mut tx = deps.db_pool.begin().await?;
    if let Some(entry) = WaitingEntry::find_by_user(user_id, &mut *tx).await? {
        WaitingEntry::delete_by_id(entry.id, &mut *tx).await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Tell every matched player which session they landed in.
pub async fn announce_match(
    deps: &EngineDeps,
    session: &GameSession,
    participants: &[Participant],
) -> EngineResult<()> {
    let roster: Vec<_> = participants
        .iter()
        .map(|p| json!({"participant_id": p.id, "user_id": p.user_id}))
        .collect();

    for participant in participants {
        deps.gateway
            .emit(
                Address::User(participant.user_id),
                "match_found",
                json!({
                    "session_id": session.id,
                    "mode": session.mode,
                    "duration_secs": session.duration_secs,
                    "participants": roster,
                }),
            )
            .await?;
    }
    Ok(())
}

/// Prefer the longer-waiting side's question-time and filter preferences so
/// widening their wait actually honors what they asked for.
pub(crate) fn merge_params(older: &ModeParams, newer: &ModeParams) -> ModeParams {
    ModeParams {
        question_time_secs: older.question_time_secs.or(newer.question_time_secs),
        category_id: older.category_id.or(newer.category_id),
        difficulty: older.difficulty.or(newer.difficulty),
    }
}
