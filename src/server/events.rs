use serde::{Deserialize, Serialize};

use crate::server::error::{ChatError, RejectReason};
use crate::server::store::StoredMessage;

pub fn default_kind() -> String {
    "text".to_string()
}

/// Inbound events, one tagged union per connection. The sender identity is
/// never taken from the payload; it comes from the authenticated session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Join a delivery channel. A user's own channel is joined at
    /// registration; naming a group id here joins that group's channel.
    #[serde(rename_all = "camelCase")]
    JoinRoom { room: String },

    #[serde(rename_all = "camelCase")]
    SendMessage {
        content: String,
        #[serde(default = "default_kind")]
        kind: String,
        #[serde(default)]
        receiver_id: Option<String>,
        #[serde(default)]
        group_id: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    GetHistory {
        #[serde(default)]
        group_id: Option<String>,
        #[serde(default)]
        user1: Option<String>,
        #[serde(default)]
        user2: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    MarkAsRead {
        sender_id: String,
        receiver_id: String,
    },
}

/// Outbound events delivered to live connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    OnlineUsers { users: Vec<String> },

    ReceiveMessage(StoredMessage),

    #[serde(rename_all = "camelCase")]
    History { messages: Vec<StoredMessage> },

    #[serde(rename_all = "camelCase")]
    MessagesRead { read_by: String },

    #[serde(rename_all = "camelCase")]
    SendRejected { reason: RejectReason, message: String },
}

impl ServerEvent {
    pub fn rejected(err: &ChatError) -> Self {
        ServerEvent::SendRejected {
            reason: err.into(),
            message: err.to_string(),
        }
    }
}
