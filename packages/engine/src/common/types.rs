//! Shared engine vocabulary: game modes, session status, answer actions.
//!
//! Database columns store these as text rather than Postgres enums; models
//! hold `String` fields and convert through these enums at the logic
//! boundary.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::common::{CategoryId, OptionId};

/// Game mode - selects the per-session rule set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    /// Synchronous 1v1, each player races their own question stream.
    QuickDuel,
    /// Buzzer-style shared questions, first correct answer scores.
    FastestFinger,
    /// Solo continuous stream against a total-time budget.
    TimeAttack,
    /// Solo step-advanced play with immediate feedback, no timers.
    Practice,
}

impl GameMode {
    /// Whether this mode is played alone (no matchmaking pairing).
    pub fn is_solo(&self) -> bool {
        matches!(self, GameMode::TimeAttack | GameMode::Practice)
    }

    /// Whether session expiry is driven by a scheduled game-end job.
    pub fn has_game_end_timer(&self) -> bool {
        !matches!(self, GameMode::Practice)
    }
}

impl std::fmt::Display for GameMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GameMode::QuickDuel => write!(f, "quick_duel"),
            GameMode::FastestFinger => write!(f, "fastest_finger"),
            GameMode::TimeAttack => write!(f, "time_attack"),
            GameMode::Practice => write!(f, "practice"),
        }
    }
}

impl std::str::FromStr for GameMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "quick_duel" => Ok(GameMode::QuickDuel),
            "fastest_finger" => Ok(GameMode::FastestFinger),
            "time_attack" => Ok(GameMode::TimeAttack),
            "practice" => Ok(GameMode::Practice),
            _ => Err(anyhow::anyhow!("Invalid game mode: {}", s)),
        }
    }
}

/// Session lifecycle status. `Ended` is terminal; no job handler may mutate
/// an ended session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Active,
    Ended,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Pending => write!(f, "pending"),
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Ended => write!(f, "ended"),
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(SessionStatus::Pending),
            "active" => Ok(SessionStatus::Active),
            "ended" => Ok(SessionStatus::Ended),
            _ => Err(anyhow::anyhow!("Invalid session status: {}", s)),
        }
    }
}

/// What a participant did with one question.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnswerAction {
    Answered,
    Skipped,
    Timeout,
}

impl std::fmt::Display for AnswerAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnswerAction::Answered => write!(f, "answered"),
            AnswerAction::Skipped => write!(f, "skipped"),
            AnswerAction::Timeout => write!(f, "timeout"),
        }
    }
}

impl std::str::FromStr for AnswerAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "answered" => Ok(AnswerAction::Answered),
            "skipped" => Ok(AnswerAction::Skipped),
            "timeout" => Ok(AnswerAction::Timeout),
            _ => Err(anyhow::anyhow!("Invalid answer action: {}", s)),
        }
    }
}

/// A participant's submission for one question: a concrete option, or skip.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnswerChoice {
    Option(OptionId),
    Skip,
}

/// Per-mode tuning supplied at matchmaking or lobby-creation time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModeParams {
    /// Per-question time budget in seconds (fastest finger).
    pub question_time_secs: Option<i32>,
    /// Restrict the question draw to a category.
    pub category_id: Option<CategoryId>,
    /// Restrict the question draw to a difficulty tier.
    pub difficulty: Option<i32>,
}
