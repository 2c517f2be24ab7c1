//! Session orchestration integration tests: answer flow per mode, timer
//! handlers, and their idempotence under duplicate firings.

mod common;

use common::{matched_pair, option_ids, seed_question_bank, TestHarness};
use engine_core::common::{AnswerChoice, GameMode, ModeParams, UserId};
use engine_core::domains::matchmaking::actions::{self, MatchOutcome};
use engine_core::domains::sessions::models::{GameSession, Participant};
use engine_core::domains::sessions::orchestrator;
use engine_core::error::EngineError;
use engine_core::kernel::jobs;
use test_context::test_context;

fn solo_params() -> ModeParams {
    ModeParams {
        question_time_secs: None,
        category_id: None,
        difficulty: None,
    }
}

#[test_context(TestHarness)]
#[tokio::test]
async fn quick_duel_correct_answer_scores_and_advances(ctx: &mut TestHarness) {
    seed_question_bank(&ctx.db_pool, 5).await.unwrap();
    let (session, participants, _, _) =
        matched_pair(&ctx.deps, GameMode::QuickDuel).await.unwrap();

    let question_id = session.question_ids()[0];
    let (correct, _) = option_ids(&ctx.db_pool, question_id).await.unwrap();

    let feedback = orchestrator::submit_answer(
        &ctx.deps,
        session.id,
        participants[0].id,
        question_id,
        AnswerChoice::Option(correct),
    )
    .await
    .unwrap();

    assert!(!feedback.stale);
    assert_eq!(feedback.correct, Some(true));
    assert_eq!(feedback.score, 1);
    // Quick duel never reveals the answer key mid-game.
    assert!(feedback.correct_option_id.is_none());

    let participant = Participant::find_by_id(participants[0].id, session.id, &ctx.db_pool)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(participant.question_cursor, 1);
    assert_eq!(participant.score, 1);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn wrong_answer_advances_without_scoring(ctx: &mut TestHarness) {
    seed_question_bank(&ctx.db_pool, 5).await.unwrap();
    let (session, participants, _, _) =
        matched_pair(&ctx.deps, GameMode::QuickDuel).await.unwrap();

    let question_id = session.question_ids()[0];
    let (_, wrong) = option_ids(&ctx.db_pool, question_id).await.unwrap();

    let feedback = orchestrator::submit_answer(
        &ctx.deps,
        session.id,
        participants[0].id,
        question_id,
        AnswerChoice::Option(wrong),
    )
    .await
    .unwrap();

    assert_eq!(feedback.correct, Some(false));
    assert_eq!(feedback.score, 0);

    let participant = Participant::find_by_id(participants[0].id, session.id, &ctx.db_pool)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(participant.question_cursor, 1);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn duplicate_submission_is_stale_and_changes_nothing(ctx: &mut TestHarness) {
    seed_question_bank(&ctx.db_pool, 5).await.unwrap();
    let (session, participants, _, _) =
        matched_pair(&ctx.deps, GameMode::QuickDuel).await.unwrap();

    let question_id = session.question_ids()[0];
    let (correct, _) = option_ids(&ctx.db_pool, question_id).await.unwrap();

    let first = orchestrator::submit_answer(
        &ctx.deps,
        session.id,
        participants[0].id,
        question_id,
        AnswerChoice::Option(correct),
    )
    .await
    .unwrap();
    let second = orchestrator::submit_answer(
        &ctx.deps,
        session.id,
        participants[0].id,
        question_id,
        AnswerChoice::Option(correct),
    )
    .await
    .unwrap();

    assert!(!first.stale);
    assert!(second.stale);
    assert_eq!(second.score, first.score);

    let participant = Participant::find_by_id(participants[0].id, session.id, &ctx.db_pool)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(participant.score, 1);
    assert_eq!(participant.question_cursor, 1);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn game_end_fires_exactly_once(ctx: &mut TestHarness) {
    seed_question_bank(&ctx.db_pool, 5).await.unwrap();
    let (session, _, _, _) =
        matched_pair(&ctx.deps, GameMode::QuickDuel).await.unwrap();

    ctx.fire_job(&jobs::game_end_identity(session.id))
        .await
        .unwrap();

    let ended = GameSession::find_by_id(session.id, &ctx.db_pool)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ended.status, "ended");

    let subject = format!("gateway.session.{}", session.id);
    assert_eq!(ctx.event_count(&subject, "game_end"), 1);

    // A duplicate firing finds the session ENDED and stops.
    orchestrator::handle_game_end(&ctx.deps, session.id)
        .await
        .unwrap();
    assert_eq!(ctx.event_count(&subject, "game_end"), 1);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn answers_after_game_end_are_rejected(ctx: &mut TestHarness) {
    seed_question_bank(&ctx.db_pool, 5).await.unwrap();
    let (session, participants, _, _) =
        matched_pair(&ctx.deps, GameMode::QuickDuel).await.unwrap();

    orchestrator::handle_game_end(&ctx.deps, session.id)
        .await
        .unwrap();

    let err = orchestrator::submit_answer(
        &ctx.deps,
        session.id,
        participants[0].id,
        session.question_ids()[0],
        AnswerChoice::Skip,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, EngineError::SessionClosed));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn question_timeout_advances_the_round_exactly_once(ctx: &mut TestHarness) {
    seed_question_bank(&ctx.db_pool, 5).await.unwrap();
    let (session, participants, _, _) =
        matched_pair(&ctx.deps, GameMode::FastestFinger).await.unwrap();

    let question_id = session.question_ids()[0];
    orchestrator::handle_question_timeout(&ctx.deps, session.id, question_id)
        .await
        .unwrap();
    orchestrator::handle_question_timeout(&ctx.deps, session.id, question_id)
        .await
        .unwrap();

    let advanced = GameSession::find_by_id(session.id, &ctx.db_pool)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(advanced.current_round, 1);

    let subject = format!("gateway.session.{}", session.id);
    assert_eq!(ctx.event_count(&subject, "question_timeout"), 1);

    // Both participants got exactly one timeout record for the round.
    for participant in &participants {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM answers WHERE participant_id = $1 AND question_id = $2",
        )
        .bind(participant.id)
        .bind(question_id)
        .fetch_one(&ctx.db_pool)
        .await
        .unwrap();
        assert_eq!(count, 1);
    }
}

#[test_context(TestHarness)]
#[tokio::test]
async fn fastest_finger_wrong_answer_locks_out_without_reveal(ctx: &mut TestHarness) {
    seed_question_bank(&ctx.db_pool, 5).await.unwrap();
    let (session, participants, _, _) =
        matched_pair(&ctx.deps, GameMode::FastestFinger).await.unwrap();

    let question_id = session.question_ids()[0];
    let (correct, wrong) = option_ids(&ctx.db_pool, question_id).await.unwrap();

    let miss = orchestrator::submit_answer(
        &ctx.deps,
        session.id,
        participants[0].id,
        question_id,
        AnswerChoice::Option(wrong),
    )
    .await
    .unwrap();
    assert_eq!(miss.correct, Some(false));
    // The opponent can still score, so the key must stay hidden.
    assert!(miss.correct_option_id.is_none());

    let locked = Participant::find_by_id(participants[0].id, session.id, &ctx.db_pool)
        .await
        .unwrap()
        .unwrap();
    assert!(locked.locked_out);

    // A locked-out participant's retry is stale, not a second attempt.
    let retry = orchestrator::submit_answer(
        &ctx.deps,
        session.id,
        participants[0].id,
        question_id,
        AnswerChoice::Option(correct),
    )
    .await
    .unwrap();
    assert!(retry.stale);

    // The opponent takes the point; the round closes and reveals.
    let point = orchestrator::submit_answer(
        &ctx.deps,
        session.id,
        participants[1].id,
        question_id,
        AnswerChoice::Option(correct),
    )
    .await
    .unwrap();
    assert_eq!(point.correct, Some(true));
    assert_eq!(point.correct_option_id, Some(correct));
    assert_eq!(point.score, 1);

    let advanced = GameSession::find_by_id(session.id, &ctx.db_pool)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(advanced.current_round, 1);
    assert_eq!(
        ctx.event_count(&format!("gateway.session.{}", session.id), "point_awarded"),
        1
    );
}

#[test_context(TestHarness)]
#[tokio::test]
async fn time_attack_starts_solo_and_holds_the_live_session_slot(ctx: &mut TestHarness) {
    seed_question_bank(&ctx.db_pool, 5).await.unwrap();
    let user = UserId::new();

    let outcome = actions::request_match(
        &ctx.deps,
        user,
        GameMode::TimeAttack,
        120,
        1500,
        &solo_params(),
    )
    .await
    .unwrap();
    let MatchOutcome::SoloStarted { session, participant } = outcome else {
        panic!("time attack should start solo");
    };
    assert_eq!(session.status, "active");

    let err = actions::request_match(
        &ctx.deps,
        user,
        GameMode::QuickDuel,
        180,
        1500,
        &solo_params(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, EngineError::AlreadyInSession));

    // Scoring works the same as other own-stream modes.
    let question_id = session.question_ids()[0];
    let (correct, _) = option_ids(&ctx.db_pool, question_id).await.unwrap();
    let feedback = orchestrator::submit_answer(
        &ctx.deps,
        session.id,
        participant.id,
        question_id,
        AnswerChoice::Option(correct),
    )
    .await
    .unwrap();
    assert_eq!(feedback.score, 1);

    // The game clock ends it; results carry the score.
    ctx.fire_job(&jobs::game_end_identity(session.id))
        .await
        .unwrap();
    let events = ctx.events_for(&format!("gateway.session.{}", session.id));
    let (_, results) = events
        .iter()
        .find(|(name, _)| name == "game_end")
        .expect("game_end emitted");
    assert_eq!(results["participants"][0]["score"], 1);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn practice_reveals_explains_and_restarts(ctx: &mut TestHarness) {
    seed_question_bank(&ctx.db_pool, 5).await.unwrap();
    let user = UserId::new();

    let outcome = actions::request_match(
        &ctx.deps,
        user,
        GameMode::Practice,
        0,
        1500,
        &solo_params(),
    )
    .await
    .unwrap();
    let MatchOutcome::SoloStarted { session, participant } = outcome else {
        panic!("practice should start solo");
    };

    let question_id = session.question_ids()[0];
    let (correct, _) = option_ids(&ctx.db_pool, question_id).await.unwrap();
    let feedback = orchestrator::submit_answer(
        &ctx.deps,
        session.id,
        participant.id,
        question_id,
        AnswerChoice::Option(correct),
    )
    .await
    .unwrap();

    // Practice always reveals and never scores.
    assert_eq!(feedback.correct_option_id, Some(correct));
    assert!(feedback.explanation.is_some());
    assert_eq!(feedback.score, 0);

    orchestrator::restart_practice(&ctx.deps, session.id, participant.id)
        .await
        .unwrap();
    let reset = Participant::find_by_id(participant.id, session.id, &ctx.db_pool)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reset.question_cursor, 0);
    assert_eq!(reset.score, 0);
    let (answers,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM answers WHERE participant_id = $1")
            .bind(participant.id)
            .fetch_one(&ctx.db_pool)
            .await
            .unwrap();
    assert_eq!(answers, 0);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn fastest_finger_defaults_the_round_timer_budget(ctx: &mut TestHarness) {
    seed_question_bank(&ctx.db_pool, 5).await.unwrap();
    let first = UserId::new();
    let second = UserId::new();

    actions::request_match(
        &ctx.deps,
        first,
        GameMode::FastestFinger,
        390,
        1200,
        &solo_params(),
    )
    .await
    .unwrap();
    let outcome = actions::request_match(
        &ctx.deps,
        second,
        GameMode::FastestFinger,
        390,
        1210,
        &solo_params(),
    )
    .await
    .unwrap();
    let MatchOutcome::Matched { session, .. } = outcome else {
        panic!("close ratings should pair");
    };

    // Nobody asked for a budget, but shared rounds cannot run without one:
    // the configured default fills in and the first round's timer is armed.
    assert_eq!(
        session.question_time_secs,
        Some(ctx.deps.config.default_question_time_secs)
    );
    let identity = jobs::question_timeout_identity(session.id, session.question_ids()[0]);
    assert_eq!(
        ctx.job_status(&identity).await.unwrap().as_deref(),
        Some("pending")
    );
}

#[test_context(TestHarness)]
#[tokio::test]
async fn stalled_game_end_job_is_reclaimed_and_runs(ctx: &mut TestHarness) {
    seed_question_bank(&ctx.db_pool, 5).await.unwrap();
    let (session, _, _, _) =
        matched_pair(&ctx.deps, GameMode::QuickDuel).await.unwrap();

    // A worker claimed the job and died: stuck in running with the lease
    // long expired.
    sqlx::query(
        r#"
        UPDATE engine_jobs
        SET status = 'running', run_at = NOW(), updated_at = NOW() - INTERVAL '5 minutes'
        WHERE identity = $1
        "#,
    )
    .bind(jobs::game_end_identity(session.id))
    .execute(&ctx.db_pool)
    .await
    .unwrap();

    ctx.drain_jobs().await.unwrap();

    let ended = GameSession::find_by_id(session.id, &ctx.db_pool)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ended.status, "ended");
    assert_eq!(
        ctx.event_count(&format!("gateway.session.{}", session.id), "game_end"),
        1
    );
}

#[test_context(TestHarness)]
#[tokio::test]
async fn exhausting_the_stream_marks_the_participant_finished(ctx: &mut TestHarness) {
    seed_question_bank(&ctx.db_pool, 5).await.unwrap();
    let mut deps = ctx.deps.clone();
    deps.config.questions_per_session = 2;
    let (session, participants, _, _) =
        matched_pair(&deps, GameMode::QuickDuel).await.unwrap();
    assert_eq!(session.question_ids().len(), 2);

    let mut last = None;
    for &question_id in session.question_ids() {
        let (correct, _) = option_ids(&ctx.db_pool, question_id).await.unwrap();
        last = Some(
            orchestrator::submit_answer(
                &ctx.deps,
                session.id,
                participants[0].id,
                question_id,
                AnswerChoice::Option(correct),
            )
            .await
            .unwrap(),
        );
    }
    let last = last.expect("two answers submitted");
    assert!(last.finished);
    assert_eq!(last.score, 2);

    let finished = Participant::find_by_id(participants[0].id, session.id, &ctx.db_pool)
        .await
        .unwrap()
        .unwrap();
    assert!(finished.finished);
    assert_eq!(
        ctx.event_count(
            &format!("gateway.session.{}", session.id),
            "participant_finished"
        ),
        1
    );

    // Finished players wait for the shared clock; further sends are rejected.
    let err = orchestrator::submit_answer(
        &ctx.deps,
        session.id,
        participants[0].id,
        session.question_ids()[1],
        AnswerChoice::Skip,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, EngineError::SessionClosed));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn restart_is_practice_only(ctx: &mut TestHarness) {
    seed_question_bank(&ctx.db_pool, 5).await.unwrap();
    let (session, participants, _, _) =
        matched_pair(&ctx.deps, GameMode::QuickDuel).await.unwrap();

    let err = orchestrator::restart_practice(&ctx.deps, session.id, participants[0].id)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::PermissionDenied(_)));
}
