use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Everything that can stop a single inbound event. Each error is terminal
/// for that event only and is reported back to the originating connection.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("message must address exactly one user or one group")]
    InvalidMessageTarget,

    #[error("message exceeds maximum length of {0} characters")]
    MessageTooLong(usize),

    #[error("group {0} not found")]
    GroupNotFound(String),

    #[error("user {user_id} is muted in group {group_id}")]
    SenderMuted { user_id: String, group_id: String },

    #[error("user {user_id} is not a member of group {group_id}")]
    NotAMember { user_id: String, group_id: String },

    #[error("invalid or expired session")]
    Unauthenticated,

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

/// Machine-readable rejection reason carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    InvalidTarget,
    MessageTooLong,
    GroupNotFound,
    Muted,
    NotAMember,
    Unauthenticated,
    Storage,
}

impl From<&ChatError> for RejectReason {
    fn from(err: &ChatError) -> Self {
        match err {
            ChatError::InvalidMessageTarget => RejectReason::InvalidTarget,
            ChatError::MessageTooLong(_) => RejectReason::MessageTooLong,
            ChatError::GroupNotFound(_) => RejectReason::GroupNotFound,
            ChatError::SenderMuted { .. } => RejectReason::Muted,
            ChatError::NotAMember { .. } => RejectReason::NotAMember,
            ChatError::Unauthenticated => RejectReason::Unauthenticated,
            ChatError::Storage(_) => RejectReason::Storage,
        }
    }
}
