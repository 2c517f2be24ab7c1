//! Session orchestration: creation, answer submission, timer handlers.
//!
//! Every operation is one short transaction against the shared store. The
//! session row is locked first, its status re-checked second; a duplicate or
//! late job firing therefore degrades to a no-op instead of a second state
//! transition. Events publish only after commit, so clients never observe a
//! state the store rolled back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgConnection;
use tracing::{debug, info};

use crate::common::{
    AnswerAction, AnswerChoice, GameMode, ModeParams, OptionId, ParticipantId, QuestionId,
    SessionId, SessionStatus, UserId,
};
use crate::config::Config;
use crate::error::{EngineError, EngineResult};
use crate::kernel::deps::EngineDeps;
use crate::kernel::gateway::Address;
use crate::kernel::jobs;
use crate::kernel::router;

use super::models::{Answer, GameSession, Participant, Question};
use super::modes::{self, Advance, AnswerContext, AnswerDecision};

// ============================================================================
// Feedback & results
// ============================================================================

/// Synchronous response to a submission. Duplicate/stale sends get the same
/// shape back with `stale: true` and no new state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerFeedback {
    pub session_id: SessionId,
    pub participant_id: ParticipantId,
    pub question_id: QuestionId,
    pub action: Option<AnswerAction>,
    pub correct: Option<bool>,
    /// Revealed only where the mode allows it (practice feedback, fastest
    /// finger after the point is decided).
    pub correct_option_id: Option<OptionId>,
    pub explanation: Option<String>,
    pub score: i32,
    pub finished: bool,
    pub stale: bool,
}

/// Answer-by-answer timing for the results graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerTiming {
    pub question_id: QuestionId,
    pub action: String,
    pub correct: Option<bool>,
    pub time_taken_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantResult {
    pub participant_id: ParticipantId,
    pub user_id: UserId,
    pub score: i32,
    pub answers: Vec<AnswerTiming>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResults {
    pub session_id: SessionId,
    pub mode: String,
    pub duration_secs: i32,
    pub participants: Vec<ParticipantResult>,
}

// ============================================================================
// Session creation
// ============================================================================

/// Create a session and its participants inside the caller's transaction.
///
/// The matchmaker calls this in the same transaction that removes both
/// waiting entries, making pairing and session creation atomic. Lobby
/// conversion and solo starts use it the same way.
pub async fn create_session_tx(
    conn: &mut PgConnection,
    config: &Config,
    mode: GameMode,
    duration_secs: i32,
    params: &ModeParams,
    users: &[UserId],
    status: SessionStatus,
) -> EngineResult<(GameSession, Vec<Participant>)> {
    let sequence = Question::draw_sequence(
        config.questions_per_session as i64,
        params.category_id,
        params.difficulty,
        &mut *conn,
    )
    .await?;

    // Shared-round play cannot run without a per-question budget; fall back
    // to the configured default when the request left it out.
    let question_time_secs = match mode {
        GameMode::FastestFinger => Some(
            params
                .question_time_secs
                .unwrap_or(config.default_question_time_secs),
        ),
        _ => params.question_time_secs,
    };

    // Always insert PENDING first so activation stamps the clocks exactly
    // once, whichever path starts the session.
    let mut session = GameSession::create(
        mode,
        duration_secs,
        question_time_secs,
        sequence,
        SessionStatus::Pending,
        &mut *conn,
    )
    .await?;

    let mut participants = Vec::with_capacity(users.len());
    for user_id in users {
        participants.push(Participant::create(session.id, *user_id, &mut *conn).await?);
    }

    if status == SessionStatus::Active {
        GameSession::activate(session.id, &mut *conn).await?;
        session = GameSession::find_by_id(session.id, &mut *conn)
            .await?
            .ok_or(EngineError::SessionClosed)?;
    }

    info!(session_id = %session.id, mode = %mode, users = users.len(), "Created game session");
    Ok((session, participants))
}

/// Arm the timers a freshly started session needs: the game-end job for every
/// timed mode, plus the first-round timer for fastest finger.
pub async fn arm_session_timers(deps: &EngineDeps, session: &GameSession) -> EngineResult<()> {
    let mode = session.game_mode()?;

    if mode.has_game_end_timer() {
        router::schedule_game_end(deps, session.id, session.duration_secs).await?;
    }

    if mode == GameMode::FastestFinger {
        if let (Some(question_id), Some(budget)) =
            (session.question_ids().first().copied(), session.question_time_secs)
        {
            router::schedule_question_timeout(deps, session.id, question_id, budget).await?;
        }
    }
    Ok(())
}

/// Push each participant their opening question.
pub async fn emit_opening_questions(
    deps: &EngineDeps,
    session: &GameSession,
    participants: &[Participant],
) -> EngineResult<()> {
    let Some(first) = session.question_ids().first().copied() else {
        return Ok(());
    };
    let Some(question) = Question::find_by_id(first, &deps.db_pool).await? else {
        return Ok(());
    };

    let payload = json!({
        "session_id": session.id,
        "index": 0,
        "question": question.public_view(),
    });

    for participant in participants {
        deps.gateway
            .emit(Address::User(participant.user_id), "new_question", payload.clone())
            .await?;
    }
    Ok(())
}

/// Start a solo session (time attack or practice). Solo modes skip the
/// waiting pool entirely; the one-live-session invariant still applies.
pub async fn start_solo(
    deps: &EngineDeps,
    user_id: UserId,
    mode: GameMode,
    duration_secs: i32,
    params: &ModeParams,
) -> EngineResult<(GameSession, Participant)> {
    let mut tx = deps.db_pool.begin().await?;

    if Participant::user_in_live_session(user_id, &mut *tx).await? {
        return Err(EngineError::AlreadyInSession);
    }

    let (session, mut participants) = create_session_tx(
        &mut *tx,
        &deps.config,
        mode,
        duration_secs,
        params,
        &[user_id],
        SessionStatus::Active,
    )
    .await?;
    tx.commit().await?;

    arm_session_timers(deps, &session).await?;
    emit_opening_questions(deps, &session, &participants).await?;

    Ok((session, participants.remove(0)))
}

// ============================================================================
// Answer submission
// ============================================================================

/// The participant's currently open question under this mode's rules.
fn current_question_for(
    mode: GameMode,
    session: &GameSession,
    participant: &Participant,
) -> Option<QuestionId> {
    match mode {
        GameMode::FastestFinger => session.round_question(),
        _ => session
            .question_ids()
            .get(participant.question_cursor as usize)
            .copied(),
    }
}

fn elapsed_ms(since: Option<DateTime<Utc>>) -> i64 {
    since
        .map(|t| (Utc::now() - t).num_milliseconds().max(0))
        .unwrap_or(0)
}

/// Submit an answer (or skip) for one question.
///
/// Stale or duplicate submissions return the current feedback unchanged;
/// submissions against a finished participant or ended session fail with
/// `SessionClosed`.
pub async fn submit_answer(
    deps: &EngineDeps,
    session_id: SessionId,
    participant_id: ParticipantId,
    question_id: QuestionId,
    choice: AnswerChoice,
) -> EngineResult<AnswerFeedback> {
    let mut tx = deps.db_pool.begin().await?;

    let Some(session) = GameSession::lock_by_id(session_id, &mut *tx).await? else {
        return Err(EngineError::SessionClosed);
    };
    let Some(participant) = Participant::find_by_id(participant_id, session_id, &mut *tx).await?
    else {
        return Err(EngineError::SessionClosed);
    };

    let mode = session.game_mode()?;
    let current = current_question_for(mode, &session, &participant);
    let existing = Answer::find_for_question(participant_id, question_id, &mut *tx).await?;

    // Only evaluate the submitted option against the open question.
    let question = if Some(question_id) == current {
        Question::find_by_id(question_id, &mut *tx).await?
    } else {
        None
    };
    let choice_correct = match (&choice, &question) {
        (AnswerChoice::Option(option_id), Some(q)) => Some(q.is_correct(*option_id)),
        _ => None,
    };

    let ctx = AnswerContext {
        mode,
        session_status: session.session_status()?,
        finished: participant.finished,
        locked_out: participant.locked_out,
        current_question: current,
        submitted_question: question_id,
        already_recorded: existing.is_some(),
        choice,
        choice_correct,
    };

    let recorded = match modes::decide_answer(&ctx) {
        AnswerDecision::Closed => return Err(EngineError::SessionClosed),
        AnswerDecision::Stale => {
            drop(tx);
            return Ok(stale_feedback(&session, &participant, question_id, existing));
        }
        AnswerDecision::Record(r) => r,
    };

    let time_taken_ms = match mode {
        GameMode::FastestFinger => elapsed_ms(session.round_started_at),
        _ => elapsed_ms(participant.question_started_at),
    };
    let option_id = match choice {
        AnswerChoice::Option(id) => Some(id),
        AnswerChoice::Skip => None,
    };

    let inserted = Answer::record(
        session_id,
        participant_id,
        question_id,
        recorded.action,
        option_id,
        recorded.correct,
        time_taken_ms,
        &mut *tx,
    )
    .await?;
    if inserted.is_none() {
        // Lost a duplicate race after the in-transaction check; same outcome
        // as any other duplicate.
        drop(tx);
        return Ok(stale_feedback(&session, &participant, question_id, existing));
    }

    let participant = Participant::apply_progress(
        participant_id,
        recorded.score_delta,
        recorded.advance == Advance::OwnCursor,
        &mut *tx,
    )
    .await?;

    if recorded.lock_out {
        Participant::set_locked_out(participant_id, true, &mut *tx).await?;
    }

    // Own-stream exhaustion: mark finished and wait for the shared timer.
    let exhausted = recorded.advance == Advance::OwnCursor
        && mode != GameMode::Practice
        && participant.question_cursor as usize >= session.question_ids().len();
    if exhausted {
        Participant::mark_finished(participant_id, &mut *tx).await?;
    }

    // Fastest finger round closure: a point was scored, or everyone is
    // locked out with no winner.
    let mut round_closed = recorded.advance == Advance::SharedRound;
    let mut closed_by_lockout = false;
    if mode == GameMode::FastestFinger && !round_closed && recorded.lock_out {
        let all = Participant::find_by_session(session_id, &mut *tx).await?;
        if all.iter().all(|p| p.locked_out) {
            round_closed = true;
            closed_by_lockout = true;
        }
    }
    if round_closed {
        GameSession::advance_round(session_id, session.current_round, &mut *tx).await?;
        Participant::reset_lockouts(session_id, &mut *tx).await?;
    }

    tx.commit().await?;

    after_answer_effects(
        deps,
        &session,
        &participant,
        question.as_ref(),
        &recorded,
        exhausted,
        round_closed,
        closed_by_lockout,
    )
    .await?;

    Ok(AnswerFeedback {
        session_id,
        participant_id,
        question_id,
        action: Some(recorded.action),
        correct: recorded.correct,
        correct_option_id: recorded
            .reveal
            .then(|| question.as_ref().map(|q| q.correct_option_id))
            .flatten(),
        explanation: recorded
            .reveal
            .then(|| question.as_ref().and_then(|q| q.explanation.clone()))
            .flatten(),
        score: participant.score,
        finished: exhausted,
        stale: false,
    })
}

fn stale_feedback(
    session: &GameSession,
    participant: &Participant,
    question_id: QuestionId,
    existing: Option<Answer>,
) -> AnswerFeedback {
    AnswerFeedback {
        session_id: session.id,
        participant_id: participant.id,
        question_id,
        action: existing
            .as_ref()
            .and_then(|a| a.action.parse::<AnswerAction>().ok()),
        correct: existing.as_ref().and_then(|a| a.correct),
        correct_option_id: None,
        explanation: None,
        score: participant.score,
        finished: participant.finished,
        stale: true,
    }
}

/// Post-commit event fan-out and timer upkeep for one recorded answer.
#[allow(clippy::too_many_arguments)]
async fn after_answer_effects(
    deps: &EngineDeps,
    session: &GameSession,
    participant: &Participant,
    question: Option<&Question>,
    recorded: &modes::RecordedAnswer,
    exhausted: bool,
    round_closed: bool,
    closed_by_lockout: bool,
) -> EngineResult<()> {
    deps.gateway
        .emit(
            Address::User(participant.user_id),
            "answer_acknowledged",
            json!({
                "session_id": session.id,
                "question_id": question.map(|q| q.id),
                "action": recorded.action,
                "correct": recorded.correct,
            }),
        )
        .await?;

    if recorded.score_delta > 0 {
        deps.gateway
            .emit(
                Address::Session(session.id),
                "score_update",
                json!({
                    "session_id": session.id,
                    "participant_id": participant.id,
                    "score": participant.score,
                }),
            )
            .await?;
    }

    match recorded.advance {
        Advance::SharedRound => {
            if let Some(q) = question {
                deps.gateway
                    .emit(
                        Address::Session(session.id),
                        "point_awarded",
                        json!({
                            "session_id": session.id,
                            "participant_id": participant.id,
                            "question_id": q.id,
                            "correct_option_id": q.correct_option_id,
                            "score": participant.score,
                        }),
                    )
                    .await?;
            }
            advance_shared_round(deps, session).await?;
        }
        Advance::None if round_closed && closed_by_lockout => {
            // No winner this round: reveal like a timeout and move on.
            if let Some(q) = question {
                deps.gateway
                    .emit(
                        Address::Session(session.id),
                        "question_timeout",
                        json!({
                            "session_id": session.id,
                            "question_id": q.id,
                            "correct_option_id": q.correct_option_id,
                        }),
                    )
                    .await?;
            }
            advance_shared_round(deps, session).await?;
        }
        Advance::OwnCursor => {
            if exhausted {
                deps.gateway
                    .emit(
                        Address::Session(session.id),
                        "participant_finished",
                        json!({
                            "session_id": session.id,
                            "participant_id": participant.id,
                            "score": participant.score,
                        }),
                    )
                    .await?;
            } else if let Some(next_id) = session
                .question_ids()
                .get(participant.question_cursor as usize)
                .copied()
            {
                if let Some(next) = Question::find_by_id(next_id, &deps.db_pool).await? {
                    deps.gateway
                        .emit(
                            Address::User(participant.user_id),
                            "new_question",
                            json!({
                                "session_id": session.id,
                                "index": participant.question_cursor,
                                "question": next.public_view(),
                            }),
                        )
                        .await?;
                }
            }
        }
        Advance::None => {}
    }
    Ok(())
}

/// Cancel the closed round's timer, then arm and announce the next shared
/// question if one remains. `session` is the pre-advance snapshot.
async fn advance_shared_round(deps: &EngineDeps, session: &GameSession) -> EngineResult<()> {
    if let Some(closed) = session.round_question() {
        // Best-effort: the timer may still fire, and the round-index guard in
        // the handler will shrug it off.
        deps.jobs
            .cancel(&jobs::question_timeout_identity(session.id, closed))
            .await?;
    }

    let next_round = (session.current_round + 1) as usize;
    let Some(next_id) = session.question_ids().get(next_round).copied() else {
        debug!(session_id = %session.id, "Fastest finger sequence exhausted, waiting for game end");
        return Ok(());
    };

    if let Some(budget) = session.question_time_secs {
        router::schedule_question_timeout(deps, session.id, next_id, budget).await?;
    }
    if let Some(next) = Question::find_by_id(next_id, &deps.db_pool).await? {
        deps.gateway
            .emit(
                Address::Session(session.id),
                "new_question",
                json!({
                    "session_id": session.id,
                    "index": next_round,
                    "question": next.public_view(),
                }),
            )
            .await?;
    }
    Ok(())
}

// ============================================================================
// Practice extras
// ============================================================================

/// Re-send the participant's current question (practice and reconnecting
/// clients).
pub async fn next_question(
    deps: &EngineDeps,
    session_id: SessionId,
    participant_id: ParticipantId,
) -> EngineResult<Option<serde_json::Value>> {
    let Some(session) = GameSession::find_by_id(session_id, &deps.db_pool).await? else {
        return Err(EngineError::SessionClosed);
    };
    if session.is_ended() {
        return Err(EngineError::SessionClosed);
    }
    let Some(participant) =
        Participant::find_by_id(participant_id, session_id, &deps.db_pool).await?
    else {
        return Err(EngineError::SessionClosed);
    };

    let mode = session.game_mode()?;
    let Some(question_id) = current_question_for(mode, &session, &participant) else {
        return Ok(None);
    };
    let Some(question) = Question::find_by_id(question_id, &deps.db_pool).await? else {
        return Ok(None);
    };

    let view = json!({
        "session_id": session.id,
        "index": match mode {
            GameMode::FastestFinger => session.current_round,
            _ => participant.question_cursor,
        },
        "question": question.public_view(),
    });

    deps.gateway
        .emit(Address::User(participant.user_id), "new_question", view.clone())
        .await?;
    Ok(Some(view))
}

/// Restart a practice session at the setup stage: history and cursor reset,
/// the session stays ACTIVE.
pub async fn restart_practice(
    deps: &EngineDeps,
    session_id: SessionId,
    participant_id: ParticipantId,
) -> EngineResult<()> {
    let mut tx = deps.db_pool.begin().await?;

    let Some(session) = GameSession::lock_by_id(session_id, &mut *tx).await? else {
        return Err(EngineError::SessionClosed);
    };
    if session.is_ended() {
        return Err(EngineError::SessionClosed);
    }
    if session.game_mode()? != GameMode::Practice {
        return Err(EngineError::PermissionDenied(
            "restart is only available in practice mode".to_string(),
        ));
    }

    Answer::delete_for_participant(participant_id, &mut *tx).await?;
    sqlx::query(
        r#"
        UPDATE participants
        SET score = 0, question_cursor = 0, finished = FALSE, question_started_at = NOW()
        WHERE id = $1 AND session_id = $2
        "#,
    )
    .bind(participant_id)
    .bind(session_id)
    .execute(&mut *tx)
    .await
    .map_err(EngineError::Store)?;

    tx.commit().await?;

    next_question(deps, session_id, participant_id).await?;
    Ok(())
}

// ============================================================================
// Timer handlers (idempotent against at-least-once delivery)
// ============================================================================

/// A fastest-finger round ran out of time: reveal, record timeouts for the
/// unresolved participants, advance. Late or duplicate firings no-op on the
/// round-index guard.
pub async fn handle_question_timeout(
    deps: &EngineDeps,
    session_id: SessionId,
    question_id: QuestionId,
) -> EngineResult<()> {
    let mut tx = deps.db_pool.begin().await?;

    let Some(session) = GameSession::lock_by_id(session_id, &mut *tx).await? else {
        debug!(session_id = %session_id, "Question timeout for missing session, ignoring");
        return Ok(());
    };
    if session.is_ended()
        || session.game_mode()? != GameMode::FastestFinger
        || session.round_question() != Some(question_id)
    {
        debug!(session_id = %session_id, question_id = %question_id, "Stale question timeout, ignoring");
        return Ok(());
    }

    let budget_ms = session.question_time_secs.unwrap_or(0) as i64 * 1000;
    for participant in Participant::find_by_session(session_id, &mut *tx).await? {
        // Participants who answered this round already hold a record; the
        // conflict clause keeps theirs.
        Answer::record(
            session_id,
            participant.id,
            question_id,
            AnswerAction::Timeout,
            None,
            None,
            budget_ms,
            &mut *tx,
        )
        .await?;
    }

    GameSession::advance_round(session_id, session.current_round, &mut *tx).await?;
    Participant::reset_lockouts(session_id, &mut *tx).await?;

    tx.commit().await?;

    if let Some(question) = Question::find_by_id(question_id, &deps.db_pool).await? {
        deps.gateway
            .emit(
                Address::Session(session_id),
                "question_timeout",
                json!({
                    "session_id": session_id,
                    "question_id": question_id,
                    "correct_option_id": question.correct_option_id,
                }),
            )
            .await?;
    }
    advance_shared_round(deps, &session).await?;
    Ok(())
}

/// The shared game clock expired: finalize scores, emit the terminal event.
/// The status flip is the idempotence guard; a second firing finds ENDED and
/// stops.
pub async fn handle_game_end(deps: &EngineDeps, session_id: SessionId) -> EngineResult<()> {
    let mut tx = deps.db_pool.begin().await?;

    let Some(session) = GameSession::lock_by_id(session_id, &mut *tx).await? else {
        debug!(session_id = %session_id, "Game end for missing session, ignoring");
        return Ok(());
    };
    if !GameSession::mark_ended(session_id, &mut *tx).await? {
        debug!(session_id = %session_id, "Session already ended, ignoring duplicate game end");
        return Ok(());
    }

    let participants = Participant::find_by_session(session_id, &mut *tx).await?;
    let mut results = SessionResults {
        session_id,
        mode: session.mode.clone(),
        duration_secs: session.duration_secs,
        participants: Vec::with_capacity(participants.len()),
    };
    for participant in &participants {
        let answers = Answer::find_by_participant(participant.id, &mut *tx).await?;
        results.participants.push(ParticipantResult {
            participant_id: participant.id,
            user_id: participant.user_id,
            score: participant.score,
            answers: answers
                .into_iter()
                .map(|a| AnswerTiming {
                    question_id: a.question_id,
                    action: a.action,
                    correct: a.correct,
                    time_taken_ms: a.time_taken_ms,
                })
                .collect(),
        });
    }

    tx.commit().await?;

    // The current round's timer is now moot.
    if let Some(open) = session.round_question() {
        deps.jobs
            .cancel(&jobs::question_timeout_identity(session_id, open))
            .await?;
    }

    info!(session_id = %session_id, "Session ended");
    deps.gateway
        .emit(
            Address::Session(session_id),
            "game_end",
            serde_json::to_value(&results).map_err(anyhow::Error::from)?,
        )
        .await?;
    Ok(())
}
