use std::sync::Arc;

use async_trait::async_trait;
use sqlx::Row;

use crate::server::database::Database;
use crate::server::error::ChatError;

/// Identity collaborator. The engine trusts the identity it returns for all
/// registry and message-authorship purposes; issuing credentials is someone
/// else's job.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify(&self, token: &str) -> Result<String, ChatError>;
}

/// Session-token verification against the sessions table.
pub struct SessionAuth {
    db: Arc<Database>,
}

impl SessionAuth {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl IdentityProvider for SessionAuth {
    async fn verify(&self, token: &str) -> Result<String, ChatError> {
        let now = chrono::Utc::now().timestamp();
        let row = sqlx::query("SELECT user_id FROM sessions WHERE session_token = ? AND expires_at > ?")
            .bind(token)
            .bind(now)
            .fetch_optional(&self.db.pool)
            .await?;
        match row {
            Some(row) => {
                let user_id: String = row.get("user_id");
                log::info!("[AUTH] Session valid for user {}", user_id);
                Ok(user_id)
            }
            None => {
                log::warn!("[AUTH] Session not found or expired");
                Err(ChatError::Unauthenticated)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> Arc<Database> {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        Arc::new(db)
    }

    async fn insert_session(db: &Database, user_id: &str, token: &str, expires_at: i64) {
        sqlx::query("INSERT INTO sessions (user_id, session_token, created_at, expires_at) VALUES (?, ?, ?, ?)")
            .bind(user_id)
            .bind(token)
            .bind(0_i64)
            .bind(expires_at)
            .execute(&db.pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn valid_token_yields_identity() {
        let db = test_db().await;
        let far_future = chrono::Utc::now().timestamp() + 3600;
        insert_session(&db, "u1", "tok-1", far_future).await;

        let auth = SessionAuth::new(db);
        assert_eq!(auth.verify("tok-1").await.unwrap(), "u1");
    }

    #[tokio::test]
    async fn expired_or_unknown_token_is_unauthenticated() {
        let db = test_db().await;
        insert_session(&db, "u1", "tok-old", 1).await;

        let auth = SessionAuth::new(db);
        assert!(matches!(
            auth.verify("tok-old").await,
            Err(ChatError::Unauthenticated)
        ));
        assert!(matches!(
            auth.verify("tok-missing").await,
            Err(ChatError::Unauthenticated)
        ));
    }
}
