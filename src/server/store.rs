use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::server::database::Database;
use crate::server::error::ChatError;

pub const DEFAULT_HISTORY_LIMIT: i64 = 50;

/// A persisted message. Immutable once appended except for `is_read`, which
/// only ever moves false -> true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: i64,
    pub sender_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub content: String,
    pub kind: String,
    pub sent_at: i64,
    pub is_read: bool,
}

/// Append-only message persistence with history retrieval by conversation
/// and read-state mutation. Ordering authority for a conversation is the
/// store-assigned (sent_at, id) pair, never arrival order at a socket.
#[derive(Clone)]
pub struct MessageStore {
    db: Arc<Database>,
}

impl MessageStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn append(
        &self,
        sender_id: &str,
        content: &str,
        kind: &str,
        receiver_id: Option<&str>,
        group_id: Option<&str>,
    ) -> Result<StoredMessage, ChatError> {
        if receiver_id.is_some() == group_id.is_some() {
            return Err(ChatError::InvalidMessageTarget);
        }

        let sent_at = chrono::Utc::now().timestamp_millis();
        let result = sqlx::query(
            "INSERT INTO messages (sender_id, receiver_id, group_id, content, kind, sent_at, is_read) \
             VALUES (?, ?, ?, ?, ?, ?, 0)",
        )
        .bind(sender_id)
        .bind(receiver_id)
        .bind(group_id)
        .bind(content)
        .bind(kind)
        .bind(sent_at)
        .execute(&self.db.pool)
        .await?;

        Ok(StoredMessage {
            id: result.last_insert_rowid(),
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.map(str::to_string),
            group_id: group_id.map(str::to_string),
            content: content.to_string(),
            kind: kind.to_string(),
            sent_at,
            is_read: false,
        })
    }

    /// Direct history for the unordered pair {user_a, user_b}: ascending
    /// order, bounded to the most recent `limit` rows. The bound selects the
    /// tail of the ascending sequence, so the query walks backwards and the
    /// result is reversed.
    pub async fn direct_history(
        &self,
        user_a: &str,
        user_b: &str,
        limit: i64,
    ) -> Result<Vec<StoredMessage>, ChatError> {
        let mut messages: Vec<StoredMessage> = sqlx::query_as(
            "SELECT id, sender_id, receiver_id, group_id, content, kind, sent_at, is_read \
             FROM messages \
             WHERE (sender_id = ?1 AND receiver_id = ?2) OR (sender_id = ?2 AND receiver_id = ?1) \
             ORDER BY sent_at DESC, id DESC LIMIT ?3",
        )
        .bind(user_a)
        .bind(user_b)
        .bind(limit)
        .fetch_all(&self.db.pool)
        .await?;
        messages.reverse();
        Ok(messages)
    }

    pub async fn group_history(
        &self,
        group_id: &str,
        limit: i64,
    ) -> Result<Vec<StoredMessage>, ChatError> {
        let mut messages: Vec<StoredMessage> = sqlx::query_as(
            "SELECT id, sender_id, receiver_id, group_id, content, kind, sent_at, is_read \
             FROM messages WHERE group_id = ? \
             ORDER BY sent_at DESC, id DESC LIMIT ?",
        )
        .bind(group_id)
        .bind(limit)
        .fetch_all(&self.db.pool)
        .await?;
        messages.reverse();
        Ok(messages)
    }

    /// Mark every unread direct message in the exact sender -> receiver
    /// direction as read; returns how many rows changed. Idempotent.
    pub async fn mark_read(&self, sender_id: &str, receiver_id: &str) -> Result<u64, ChatError> {
        let result = sqlx::query(
            "UPDATE messages SET is_read = 1 \
             WHERE sender_id = ? AND receiver_id = ? AND is_read = 0",
        )
        .bind(sender_id)
        .bind(receiver_id)
        .execute(&self.db.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> MessageStore {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        MessageStore::new(Arc::new(db))
    }

    #[tokio::test]
    async fn append_assigns_id_and_unread_flag() {
        let store = test_store().await;
        let message = store
            .append("u1", "hi", "text", Some("u2"), None)
            .await
            .unwrap();
        assert!(message.id > 0);
        assert!(!message.is_read);
        assert_eq!(message.receiver_id.as_deref(), Some("u2"));

        let history = store.direct_history("u1", "u2", 50).await.unwrap();
        assert_eq!(history, vec![message]);
    }

    #[tokio::test]
    async fn append_requires_exactly_one_target() {
        let store = test_store().await;
        assert!(matches!(
            store.append("u1", "hi", "text", None, None).await,
            Err(ChatError::InvalidMessageTarget)
        ));
        assert!(matches!(
            store
                .append("u1", "hi", "text", Some("u2"), Some("g1"))
                .await,
            Err(ChatError::InvalidMessageTarget)
        ));
        assert!(store.direct_history("u1", "u2", 50).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn direct_history_covers_both_directions_in_order() {
        let store = test_store().await;
        store.append("u1", "one", "text", Some("u2"), None).await.unwrap();
        store.append("u2", "two", "text", Some("u1"), None).await.unwrap();
        store.append("u1", "three", "text", Some("u2"), None).await.unwrap();
        // Unrelated conversation must not leak in
        store.append("u1", "noise", "text", Some("u9"), None).await.unwrap();

        let history = store.direct_history("u2", "u1", 50).await.unwrap();
        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two", "three"]);
        for pair in history.windows(2) {
            assert!(pair[0].sent_at <= pair[1].sent_at);
            assert!(pair[0].id < pair[1].id);
        }
    }

    #[tokio::test]
    async fn history_limit_keeps_the_most_recent_tail() {
        let store = test_store().await;
        for i in 0..8 {
            store
                .append("u1", &format!("m{}", i), "text", Some("u2"), None)
                .await
                .unwrap();
        }
        let history = store.direct_history("u1", "u2", 3).await.unwrap();
        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m5", "m6", "m7"]);
    }

    #[tokio::test]
    async fn group_history_is_scoped_and_bounded() {
        let store = test_store().await;
        for i in 0..5 {
            store
                .append("u1", &format!("g{}", i), "text", None, Some("g1"))
                .await
                .unwrap();
        }
        store.append("u1", "other", "text", None, Some("g2")).await.unwrap();

        let history = store.group_history("g1", 2).await.unwrap();
        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["g3", "g4"]);
    }

    #[tokio::test]
    async fn mark_read_is_directional_and_idempotent() {
        let store = test_store().await;
        let sent = store.append("u1", "hi", "text", Some("u2"), None).await.unwrap();
        store.append("u2", "reply", "text", Some("u1"), None).await.unwrap();

        // u2 acknowledges u1's messages
        assert_eq!(store.mark_read("u1", "u2").await.unwrap(), 1);
        assert_eq!(store.mark_read("u1", "u2").await.unwrap(), 0);

        let history = store.direct_history("u1", "u2", 50).await.unwrap();
        let from_u1 = history.iter().find(|m| m.sender_id == "u1").unwrap();
        let from_u2 = history.iter().find(|m| m.sender_id == "u2").unwrap();
        assert!(from_u1.is_read);
        // The reverse direction is untouched
        assert!(!from_u2.is_read);
        // Nothing but the read flag changed
        assert_eq!(from_u1.content, sent.content);
        assert_eq!(from_u1.sent_at, sent.sent_at);
        assert_eq!(from_u1.id, sent.id);
    }
}
