//! Skill-based matchmaking over a store-backed waiting pool.

pub mod actions;
pub mod models;
pub mod pairing;
pub mod sweep;

pub use actions::MatchOutcome;
pub use models::WaitingEntry;
