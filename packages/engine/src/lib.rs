// QuizRush - Matchmaking & Game-Session Orchestration Engine
//
// This crate pairs players into live trivia sessions and drives each session
// to completion under strict timing rules. Timers (question timeouts, game
// end, lobby countdowns, the matchmaking sweep) ride a durable job table so
// any worker can advance any session; session and lobby state live in
// Postgres, never in worker memory.

pub mod common;
pub mod config;
pub mod domains;
pub mod error;
pub mod kernel;

pub use config::*;
pub use error::EngineError;
