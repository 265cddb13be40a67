use axum::http::StatusCode;
use thiserror::Error;

/// Longest message content accepted, in characters. Bounds the payload
/// fanned out to every socket in a room.
pub const MAX_CONTENT_LEN: usize = 4000;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("authentication failed")]
    AuthenticationFailure,

    #[error("conversation not found")]
    ConversationNotFound,

    #[error("a conversation needs at least two distinct participants")]
    InvalidParticipants,

    #[error("message content is empty")]
    EmptyContent,

    #[error("message content exceeds {MAX_CONTENT_LEN} characters")]
    ContentTooLong,

    #[error("user is not a participant of this conversation")]
    NotParticipant,

    #[error("message not found")]
    MessageNotFound,

    #[error("operation not permitted")]
    Forbidden,

    #[error("corrupt record: {0}")]
    Corrupt(#[from] uuid::Error),

    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

impl ChatError {
    pub fn status(&self) -> StatusCode {
        match self {
            ChatError::AuthenticationFailure => StatusCode::UNAUTHORIZED,
            ChatError::ConversationNotFound | ChatError::MessageNotFound => StatusCode::NOT_FOUND,
            ChatError::InvalidParticipants
            | ChatError::EmptyContent
            | ChatError::ContentTooLong => StatusCode::UNPROCESSABLE_ENTITY,
            ChatError::NotParticipant | ChatError::Forbidden => StatusCode::FORBIDDEN,
            ChatError::Corrupt(_) | ChatError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
