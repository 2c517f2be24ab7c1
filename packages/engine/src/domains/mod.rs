pub mod lobbies;
pub mod matchmaking;
pub mod sessions;
