//! Shared types used across all engine domains.

pub mod entity_ids;
pub mod id;
pub mod types;

pub use entity_ids::{
    CategoryId, LobbyId, OptionId, ParticipantId, QuestionId, SessionId, UserId, WaitingEntryId,
};
pub use id::{Id, V4, V7};
pub use types::{AnswerAction, AnswerChoice, GameMode, ModeParams, SessionStatus};
