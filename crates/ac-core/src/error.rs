use crate::id::{ActorId, TokenId};

/// Alias for `Result<T, CoreError>`.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur when looking things up on the battlefield.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The requested actor does not exist on the battlefield.
    #[error("actor not found: {0}")]
    ActorNotFound(ActorId),

    /// The requested token does not exist on the battlefield.
    #[error("token not found: {0}")]
    TokenNotFound(TokenId),

    /// A named reference could not be resolved to a token or actor.
    #[error("unknown participant: \"{0}\"")]
    UnknownParticipant(String),

    /// A generic validation error with a descriptive message.
    #[error("validation error: {0}")]
    Validation(String),
}
