//! Per-mode answer rules.
//!
//! The four rule sets (quick duel, fastest finger, time attack, practice)
//! share one decision surface: given a snapshot of the session, participant,
//! and submission, decide what to record and how to advance. The decision is
//! pure; the orchestrator applies it transactionally. Dispatch is a tagged
//! match over [`GameMode`], not inheritance.

use crate::common::{AnswerAction, AnswerChoice, GameMode, QuestionId, SessionStatus};

/// Snapshot the orchestrator assembles before deciding an answer.
#[derive(Debug, Clone)]
pub struct AnswerContext {
    pub mode: GameMode,
    pub session_status: SessionStatus,
    /// Participant already marked finished (exhausted their stream).
    pub finished: bool,
    /// Fastest finger: participant answered wrong this round.
    pub locked_out: bool,
    /// The question currently open for this participant (own-stream cursor)
    /// or for the shared round (fastest finger). `None` when the sequence is
    /// exhausted.
    pub current_question: Option<QuestionId>,
    pub submitted_question: QuestionId,
    /// A record for this (participant, question) already exists.
    pub already_recorded: bool,
    pub choice: AnswerChoice,
    /// Whether the chosen option is correct. `None` for skips.
    pub choice_correct: Option<bool>,
}

/// How the participant's position moves after a recorded answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Stay on the current question (fastest finger wrong answer, lockout).
    None,
    /// Advance this participant's own cursor.
    OwnCursor,
    /// Close the shared round for everyone (fastest finger point).
    SharedRound,
}

/// What to persist and emit for one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedAnswer {
    pub action: AnswerAction,
    pub correct: Option<bool>,
    pub score_delta: i32,
    pub advance: Advance,
    /// Lock this participant out for the remainder of the round.
    pub lock_out: bool,
    /// Include the correct option (and explanation, if any) in the feedback.
    /// Fastest finger only reveals on a scored point; wrong answers must not
    /// leak the answer to the locked-out player.
    pub reveal: bool,
}

/// Outcome of deciding one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerDecision {
    /// Session ended/pending or participant finished: reject with
    /// `SessionClosed`.
    Closed,
    /// Duplicate or out-of-round submission: no-op, return current feedback.
    Stale,
    /// Record and apply.
    Record(RecordedAnswer),
}

/// Decide one submission. Duplicate sends and stale question ids resolve to
/// [`AnswerDecision::Stale`] so network retries can never double-score.
pub fn decide_answer(ctx: &AnswerContext) -> AnswerDecision {
    if ctx.session_status != SessionStatus::Active || ctx.finished {
        return AnswerDecision::Closed;
    }

    let Some(current) = ctx.current_question else {
        // Sequence exhausted but not yet marked finished (shared-round modes
        // drained their questions). Nothing left to score.
        return AnswerDecision::Stale;
    };

    if ctx.submitted_question != current || ctx.already_recorded {
        return AnswerDecision::Stale;
    }

    match ctx.mode {
        GameMode::QuickDuel | GameMode::TimeAttack => match ctx.choice {
            AnswerChoice::Skip => AnswerDecision::Record(RecordedAnswer {
                action: AnswerAction::Skipped,
                correct: None,
                score_delta: 0,
                advance: Advance::OwnCursor,
                lock_out: false,
                reveal: false,
            }),
            AnswerChoice::Option(_) => {
                let correct = ctx.choice_correct.unwrap_or(false);
                AnswerDecision::Record(RecordedAnswer {
                    action: AnswerAction::Answered,
                    correct: Some(correct),
                    score_delta: if correct { 1 } else { 0 },
                    advance: Advance::OwnCursor,
                    lock_out: false,
                    reveal: false,
                })
            }
        },
        GameMode::FastestFinger => {
            if ctx.locked_out {
                return AnswerDecision::Stale;
            }
            match ctx.choice {
                // Bowing out of the round counts as a lockout, without a
                // reveal: the opponent may still score.
                AnswerChoice::Skip => AnswerDecision::Record(RecordedAnswer {
                    action: AnswerAction::Skipped,
                    correct: None,
                    score_delta: 0,
                    advance: Advance::None,
                    lock_out: true,
                    reveal: false,
                }),
                AnswerChoice::Option(_) => {
                    let correct = ctx.choice_correct.unwrap_or(false);
                    if correct {
                        AnswerDecision::Record(RecordedAnswer {
                            action: AnswerAction::Answered,
                            correct: Some(true),
                            score_delta: 1,
                            advance: Advance::SharedRound,
                            lock_out: false,
                            reveal: true,
                        })
                    } else {
                        AnswerDecision::Record(RecordedAnswer {
                            action: AnswerAction::Answered,
                            correct: Some(false),
                            score_delta: 0,
                            advance: Advance::None,
                            lock_out: true,
                            reveal: false,
                        })
                    }
                }
            }
        }
        GameMode::Practice => {
            let (action, correct) = match ctx.choice {
                AnswerChoice::Skip => (AnswerAction::Skipped, None),
                AnswerChoice::Option(_) => {
                    (AnswerAction::Answered, Some(ctx.choice_correct.unwrap_or(false)))
                }
            };
            AnswerDecision::Record(RecordedAnswer {
                action,
                correct,
                score_delta: 0,
                advance: Advance::OwnCursor,
                lock_out: false,
                reveal: true,
            })
        }
    }
}
