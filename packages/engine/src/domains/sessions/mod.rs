//! Game-session orchestration: the per-session state machine and the four
//! mode rule sets.

pub mod models;
pub mod modes;
pub mod orchestrator;

pub use models::{Answer, GameSession, Participant, Question, QuestionOption};
pub use orchestrator::{AnswerFeedback, SessionResults};
