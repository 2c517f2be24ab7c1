//! Session entities and their queries.
//!
//! Mutating queries are written so any worker can apply them inside a short
//! transaction; the row is the source of truth, never worker memory. Status
//! and mode are stored as text and converted through the shared enums at the
//! logic boundary.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::types::Json;
use sqlx::{PgConnection, PgExecutor};
use std::str::FromStr;

use crate::common::{
    AnswerAction, CategoryId, GameMode, OptionId, ParticipantId, QuestionId, SessionId,
    SessionStatus, UserId,
};

// ============================================================================
// GameSession
// ============================================================================

/// One live game instance, from pairing/lobby-start to game end.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct GameSession {
    pub id: SessionId,
    pub mode: String,
    pub status: String,
    pub duration_secs: i32,
    pub question_time_secs: Option<i32>,
    pub question_sequence: Json<Vec<QuestionId>>,
    pub current_round: i32,
    pub round_started_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl GameSession {
    pub fn game_mode(&self) -> Result<GameMode> {
        GameMode::from_str(&self.mode)
    }

    pub fn session_status(&self) -> Result<SessionStatus> {
        SessionStatus::from_str(&self.status)
    }

    pub fn is_ended(&self) -> bool {
        self.status == "ended"
    }

    pub fn question_ids(&self) -> &[QuestionId] {
        &self.question_sequence.0
    }

    /// The shared question for the current fastest-finger round, if any
    /// remain.
    pub fn round_question(&self) -> Option<QuestionId> {
        self.question_ids().get(self.current_round as usize).copied()
    }

    /// Insert a new session.
    pub async fn create(
        mode: GameMode,
        duration_secs: i32,
        question_time_secs: Option<i32>,
        question_sequence: Vec<QuestionId>,
        status: SessionStatus,
        executor: impl PgExecutor<'_>,
    ) -> Result<Self> {
        let session = sqlx::query_as::<_, GameSession>(
            r#"
            INSERT INTO game_sessions (id, mode, status, duration_secs, question_time_secs, question_sequence)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(SessionId::new())
        .bind(mode.to_string())
        .bind(status.to_string())
        .bind(duration_secs)
        .bind(question_time_secs)
        .bind(Json(question_sequence))
        .fetch_one(executor)
        .await?;
        Ok(session)
    }

    pub async fn find_by_id(
        id: SessionId,
        executor: impl PgExecutor<'_>,
    ) -> Result<Option<Self>> {
        let session =
            sqlx::query_as::<_, GameSession>("SELECT * FROM game_sessions WHERE id = $1")
                .bind(id)
                .fetch_optional(executor)
                .await?;
        Ok(session)
    }

    /// Load a session with a row lock. Two workers racing on the same session
    /// serialize here; the store decides who goes first.
    pub async fn lock_by_id(id: SessionId, conn: &mut PgConnection) -> Result<Option<Self>> {
        let session = sqlx::query_as::<_, GameSession>(
            "SELECT * FROM game_sessions WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(session)
    }

    /// Flip PENDING → ACTIVE and start the clock.
    pub async fn activate(id: SessionId, executor: impl PgExecutor<'_>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE game_sessions
            SET status = 'active', started_at = NOW(), round_started_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Advance the shared round index (fastest finger). Guarded on the
    /// expected round so a duplicate advance is a no-op.
    pub async fn advance_round(
        id: SessionId,
        from_round: i32,
        executor: impl PgExecutor<'_>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE game_sessions
            SET current_round = current_round + 1, round_started_at = NOW()
            WHERE id = $1 AND current_round = $2 AND status = 'active'
            "#,
        )
        .bind(id)
        .bind(from_round)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Flip to ENDED. Returns false when the session was already terminal,
    /// which callers treat as "someone else ended it" and stop.
    pub async fn mark_ended(id: SessionId, executor: impl PgExecutor<'_>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE game_sessions
            SET status = 'ended', ended_at = NOW()
            WHERE id = $1 AND status <> 'ended'
            "#,
        )
        .bind(id)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

// ============================================================================
// Participant
// ============================================================================

/// A user's membership record within one session.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Participant {
    pub id: ParticipantId,
    pub session_id: SessionId,
    pub user_id: UserId,
    pub score: i32,
    pub question_cursor: i32,
    pub question_started_at: Option<DateTime<Utc>>,
    pub finished: bool,
    pub locked_out: bool,
    pub created_at: DateTime<Utc>,
}

impl Participant {
    pub async fn create(
        session_id: SessionId,
        user_id: UserId,
        executor: impl PgExecutor<'_>,
    ) -> Result<Self> {
        let participant = sqlx::query_as::<_, Participant>(
            r#"
            INSERT INTO participants (id, session_id, user_id, question_started_at)
            VALUES ($1, $2, $3, NOW())
            RETURNING *
            "#,
        )
        .bind(ParticipantId::new())
        .bind(session_id)
        .bind(user_id)
        .fetch_one(executor)
        .await?;
        Ok(participant)
    }

    pub async fn find_by_id(
        id: ParticipantId,
        session_id: SessionId,
        executor: impl PgExecutor<'_>,
    ) -> Result<Option<Self>> {
        let participant = sqlx::query_as::<_, Participant>(
            "SELECT * FROM participants WHERE id = $1 AND session_id = $2",
        )
        .bind(id)
        .bind(session_id)
        .fetch_optional(executor)
        .await?;
        Ok(participant)
    }

    pub async fn find_by_session(
        session_id: SessionId,
        executor: impl PgExecutor<'_>,
    ) -> Result<Vec<Self>> {
        let participants = sqlx::query_as::<_, Participant>(
            "SELECT * FROM participants WHERE session_id = $1 ORDER BY created_at",
        )
        .bind(session_id)
        .fetch_all(executor)
        .await?;
        Ok(participants)
    }

    /// Whether this user belongs to any non-ENDED session. Enforces the
    /// one-live-session invariant at enqueue and lobby-join time.
    pub async fn user_in_live_session(
        user_id: UserId,
        executor: impl PgExecutor<'_>,
    ) -> Result<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1
                FROM participants p
                JOIN game_sessions s ON s.id = p.session_id
                WHERE p.user_id = $1 AND s.status <> 'ended'
            )
            "#,
        )
        .bind(user_id)
        .fetch_one(executor)
        .await?;
        Ok(exists)
    }

    /// Apply a scored answer: bump score and (for own-stream modes) the
    /// cursor, restarting the per-question clock.
    pub async fn apply_progress(
        id: ParticipantId,
        score_delta: i32,
        advance_cursor: bool,
        executor: impl PgExecutor<'_>,
    ) -> Result<Self> {
        let participant = sqlx::query_as::<_, Participant>(
            r#"
            UPDATE participants
            SET score = score + $2,
                question_cursor = question_cursor + CASE WHEN $3 THEN 1 ELSE 0 END,
                question_started_at = CASE WHEN $3 THEN NOW() ELSE question_started_at END
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(score_delta)
        .bind(advance_cursor)
        .fetch_one(executor)
        .await?;
        Ok(participant)
    }

    pub async fn mark_finished(id: ParticipantId, executor: impl PgExecutor<'_>) -> Result<()> {
        sqlx::query("UPDATE participants SET finished = TRUE WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;
        Ok(())
    }

    pub async fn set_locked_out(
        id: ParticipantId,
        locked_out: bool,
        executor: impl PgExecutor<'_>,
    ) -> Result<()> {
        sqlx::query("UPDATE participants SET locked_out = $2 WHERE id = $1")
            .bind(id)
            .bind(locked_out)
            .execute(executor)
            .await?;
        Ok(())
    }

    /// Clear all lockouts when a fastest-finger round closes.
    pub async fn reset_lockouts(
        session_id: SessionId,
        executor: impl PgExecutor<'_>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE participants SET locked_out = FALSE, question_started_at = NOW() WHERE session_id = $1",
        )
        .bind(session_id)
        .execute(executor)
        .await?;
        Ok(())
    }
}

// ============================================================================
// Answer
// ============================================================================

/// One closed question round for one participant. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Answer {
    pub id: uuid::Uuid,
    pub session_id: SessionId,
    pub participant_id: ParticipantId,
    pub question_id: QuestionId,
    pub action: String,
    pub option_id: Option<OptionId>,
    pub correct: Option<bool>,
    pub time_taken_ms: i64,
    pub created_at: DateTime<Utc>,
}

impl Answer {
    /// Record a round result. Returns `None` when this participant already
    /// has a record for the question, so a duplicate client send cannot
    /// double-score.
    #[allow(clippy::too_many_arguments)]
    pub async fn record(
        session_id: SessionId,
        participant_id: ParticipantId,
        question_id: QuestionId,
        action: AnswerAction,
        option_id: Option<OptionId>,
        correct: Option<bool>,
        time_taken_ms: i64,
        executor: impl PgExecutor<'_>,
    ) -> Result<Option<Self>> {
        let answer = sqlx::query_as::<_, Answer>(
            r#"
            INSERT INTO answers (id, session_id, participant_id, question_id, action, option_id, correct, time_taken_ms)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (participant_id, question_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(uuid::Uuid::new_v4())
        .bind(session_id)
        .bind(participant_id)
        .bind(question_id)
        .bind(action.to_string())
        .bind(option_id)
        .bind(correct)
        .bind(time_taken_ms)
        .fetch_optional(executor)
        .await?;
        Ok(answer)
    }

    pub async fn find_for_question(
        participant_id: ParticipantId,
        question_id: QuestionId,
        executor: impl PgExecutor<'_>,
    ) -> Result<Option<Self>> {
        let answer = sqlx::query_as::<_, Answer>(
            "SELECT * FROM answers WHERE participant_id = $1 AND question_id = $2",
        )
        .bind(participant_id)
        .bind(question_id)
        .fetch_optional(executor)
        .await?;
        Ok(answer)
    }

    pub async fn find_by_participant(
        participant_id: ParticipantId,
        executor: impl PgExecutor<'_>,
    ) -> Result<Vec<Self>> {
        let answers = sqlx::query_as::<_, Answer>(
            "SELECT * FROM answers WHERE participant_id = $1 ORDER BY created_at",
        )
        .bind(participant_id)
        .fetch_all(executor)
        .await?;
        Ok(answers)
    }

    /// Delete a participant's history (practice restart).
    pub async fn delete_for_participant(
        participant_id: ParticipantId,
        executor: impl PgExecutor<'_>,
    ) -> Result<()> {
        sqlx::query("DELETE FROM answers WHERE participant_id = $1")
            .bind(participant_id)
            .execute(executor)
            .await?;
        Ok(())
    }
}

// ============================================================================
// Question (read-only reference data)
// ============================================================================

/// An answer option presented to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: OptionId,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Question {
    pub id: QuestionId,
    pub text: String,
    pub options: Json<Vec<QuestionOption>>,
    pub correct_option_id: OptionId,
    pub explanation: Option<String>,
    pub difficulty: i32,
    pub category_id: Option<CategoryId>,
    pub created_at: DateTime<Utc>,
}

impl Question {
    pub async fn find_by_id(
        id: QuestionId,
        executor: impl PgExecutor<'_>,
    ) -> Result<Option<Self>> {
        let question = sqlx::query_as::<_, Question>("SELECT * FROM questions WHERE id = $1")
            .bind(id)
            .fetch_optional(executor)
            .await?;
        Ok(question)
    }

    /// Draw a random question sequence, optionally filtered by category and
    /// difficulty. The draw is session-scoped, so a session never repeats a
    /// question.
    pub async fn draw_sequence(
        count: i64,
        category_id: Option<CategoryId>,
        difficulty: Option<i32>,
        executor: impl PgExecutor<'_>,
    ) -> Result<Vec<QuestionId>> {
        let ids: Vec<(QuestionId,)> = sqlx::query_as(
            r#"
            SELECT id FROM questions
            WHERE ($1::uuid IS NULL OR category_id = $1)
              AND ($2::int IS NULL OR difficulty = $2)
            ORDER BY random()
            LIMIT $3
            "#,
        )
        .bind(category_id)
        .bind(difficulty)
        .bind(count)
        .fetch_all(executor)
        .await?;
        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    /// Whether an option id belongs to this question's correct answer.
    pub fn is_correct(&self, option_id: OptionId) -> bool {
        self.correct_option_id == option_id
    }

    /// Client-safe view: never includes the correct option or explanation.
    /// The reveal happens only through point-awarded / question-timeout /
    /// feedback payloads after the round is decided.
    pub fn public_view(&self) -> serde_json::Value {
        json!({
            "question_id": self.id,
            "text": self.text,
            "options": self.options.0,
            "difficulty": self.difficulty,
            "category_id": self.category_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question_with_options() -> Question {
        let correct = OptionId::new();
        Question {
            id: QuestionId::new(),
            text: "Which planet is closest to the sun?".into(),
            options: Json(vec![
                QuestionOption {
                    id: correct,
                    text: "Mercury".into(),
                },
                QuestionOption {
                    id: OptionId::new(),
                    text: "Venus".into(),
                },
            ]),
            correct_option_id: correct,
            explanation: Some("Mercury orbits at ~0.39 AU.".into()),
            difficulty: 1,
            category_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn public_view_never_marks_the_answer() {
        let question = question_with_options();
        let view = question.public_view();

        assert!(view.get("correct_option_id").is_none());
        assert!(view.get("explanation").is_none());
        assert_eq!(view["options"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn is_correct_matches_only_the_right_option() {
        let question = question_with_options();
        assert!(question.is_correct(question.correct_option_id));
        assert!(!question.is_correct(OptionId::new()));
    }

    #[test]
    fn round_question_walks_the_sequence() {
        let questions = vec![QuestionId::new(), QuestionId::new()];
        let mut session = GameSession {
            id: SessionId::new(),
            mode: GameMode::FastestFinger.to_string(),
            status: "active".into(),
            duration_secs: 120,
            question_time_secs: Some(10),
            question_sequence: Json(questions.clone()),
            current_round: 0,
            round_started_at: None,
            started_at: None,
            ended_at: None,
            created_at: Utc::now(),
        };

        assert_eq!(session.round_question(), Some(questions[0]));
        session.current_round = 1;
        assert_eq!(session.round_question(), Some(questions[1]));
        session.current_round = 2;
        assert_eq!(session.round_question(), None);
    }
}
