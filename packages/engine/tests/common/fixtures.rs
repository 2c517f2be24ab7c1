//! Test fixtures for seeding reference data and common game setups.

use anyhow::Result;
use serde_json::json;
use sqlx::PgPool;

use engine_core::common::{OptionId, QuestionId, UserId};
use engine_core::common::{GameMode, ModeParams};
use engine_core::domains::matchmaking::actions::{self, MatchOutcome};
use engine_core::domains::sessions::models::{GameSession, Participant, Question};
use engine_core::kernel::EngineDeps;

/// Insert one four-option question and return its id plus the correct and a
/// wrong option id.
pub async fn seed_question(pool: &PgPool, difficulty: i32) -> Result<(QuestionId, OptionId, OptionId)> {
    let id = QuestionId::new();
    let correct = OptionId::new();
    let wrong = OptionId::new();
    let options = json!([
        {"id": correct, "text": "Right"},
        {"id": wrong, "text": "Wrong"},
        {"id": OptionId::new(), "text": "Also wrong"},
        {"id": OptionId::new(), "text": "Still wrong"},
    ]);

    sqlx::query(
        r#"
        INSERT INTO questions (id, text, options, correct_option_id, explanation, difficulty)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(id)
    .bind(format!("Test question {}", id))
    .bind(options)
    .bind(correct)
    .bind("Because the fixture says so.")
    .bind(difficulty)
    .execute(pool)
    .await?;

    Ok((id, correct, wrong))
}

/// Seed a batch of questions so `draw_sequence` has something to draw from.
pub async fn seed_question_bank(pool: &PgPool, count: usize) -> Result<()> {
    for _ in 0..count {
        seed_question(pool, 1).await?;
    }
    Ok(())
}

/// Enqueue two compatible players and return the session they land in.
///
/// Each call uses a unique session duration. The pool pairs on
/// (mode, duration), so concurrent tests sharing the database can never
/// claim each other's entries.
pub async fn matched_pair(
    deps: &EngineDeps,
    mode: GameMode,
) -> Result<(GameSession, Vec<Participant>, UserId, UserId)> {
    static NEXT_DURATION: std::sync::atomic::AtomicI32 = std::sync::atomic::AtomicI32::new(600);
    let duration_secs = NEXT_DURATION.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

    let first = UserId::new();
    let second = UserId::new();
    let params = ModeParams {
        question_time_secs: Some(10),
        category_id: None,
        difficulty: None,
    };

    let queued =
        actions::request_match(deps, first, mode, duration_secs, 1200, &params).await?;
    assert!(matches!(queued, MatchOutcome::Queued { .. }));

    let outcome =
        actions::request_match(deps, second, mode, duration_secs, 1210, &params).await?;
    match outcome {
        MatchOutcome::Matched {
            session,
            participants,
        } => Ok((session, participants, first, second)),
        other => anyhow::bail!("expected a match, got {:?}", other),
    }
}

/// Look up the correct and a wrong option for a question id.
pub async fn option_ids(
    pool: &PgPool,
    question_id: QuestionId,
) -> Result<(OptionId, OptionId)> {
    let question = Question::find_by_id(question_id, pool)
        .await?
        .expect("fixture question exists");
    let wrong = question
        .options
        .0
        .iter()
        .map(|o| o.id)
        .find(|id| *id != question.correct_option_id)
        .expect("question has a wrong option");
    Ok((question.correct_option_id, wrong))
}
