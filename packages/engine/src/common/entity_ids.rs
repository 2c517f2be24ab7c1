//! Typed ID aliases for engine entities.
//!
//! One marker type per entity, so ids of different entities cannot be mixed
//! up at compile time.

pub use super::id::{Id, V4, V7};

/// Marker type for users (owned by the external profile store; the engine
/// only ever references them).
pub struct User;

/// Marker type for game sessions.
pub struct GameSession;

/// Marker type for participants (a user's membership in one session).
pub struct Participant;

/// Marker type for questions (read-only reference data).
pub struct Question;

/// Marker type for answer options within a question.
pub struct QuestionOption;

/// Marker type for question categories.
pub struct Category;

/// Marker type for waiting-pool entries.
pub struct WaitingEntry;

/// Marker type for lobbies.
pub struct Lobby;

pub type UserId = Id<User>;
pub type SessionId = Id<GameSession>;
pub type ParticipantId = Id<Participant>;
pub type QuestionId = Id<Question>;
pub type OptionId = Id<QuestionOption>;
pub type CategoryId = Id<Category>;
pub type WaitingEntryId = Id<WaitingEntry>;
pub type LobbyId = Id<Lobby>;
