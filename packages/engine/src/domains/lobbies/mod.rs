//! Private game lobbies with admin-gated countdown start.

pub mod actions;
pub mod models;

pub use models::{Lobby, LobbyMember};
