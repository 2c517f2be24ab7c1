use thiserror::Error;

/// Engine errors returned synchronously to the API layer.
///
/// Validation and permission failures are terminal for the request and never
/// retried. Store failures propagate out of job handlers so the job runner's
/// backoff policy takes over.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Participant already has a waiting matchmaking entry")]
    AlreadyQueued,

    #[error("Participant is already in a live session")]
    AlreadyInSession,

    #[error("No match found within the wait ceiling")]
    MatchmakingTimeout,

    #[error("Session is ended or does not exist")]
    SessionClosed,

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Lobby not found for room code {0}")]
    LobbyNotFound(String),

    #[error("Event '{0}' is not on the publishable allow-list")]
    UnknownEvent(String),

    #[error("Database error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl EngineError {
    /// Whether a job handler failing with this error should be retried by the
    /// job runner. Domain rejections are permanent; infrastructure failures
    /// are transient.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Store(_) | EngineError::Internal(_))
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
