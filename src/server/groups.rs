use std::sync::Arc;

use async_trait::async_trait;
use sqlx::Row;

use crate::server::database::Database;
use crate::server::error::ChatError;

/// Point-in-time view of a group as the engine consumes it. Group lifecycle
/// and membership administration belong to a collaborator; the engine only
/// reads snapshots for moderation and channel joins.
#[derive(Debug, Clone)]
pub struct GroupSnapshot {
    pub id: String,
    pub members: Vec<String>,
    pub muted: Vec<String>,
}

impl GroupSnapshot {
    pub fn is_member(&self, user_id: &str) -> bool {
        self.members.iter().any(|m| m == user_id)
    }

    pub fn is_muted(&self, user_id: &str) -> bool {
        self.muted.iter().any(|m| m == user_id)
    }
}

#[async_trait]
pub trait GroupProvider: Send + Sync {
    async fn get_group(&self, group_id: &str) -> Result<GroupSnapshot, ChatError>;
}

/// Snapshot provider over the groups tables.
pub struct GroupDirectory {
    db: Arc<Database>,
}

impl GroupDirectory {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl GroupProvider for GroupDirectory {
    async fn get_group(&self, group_id: &str) -> Result<GroupSnapshot, ChatError> {
        let row = sqlx::query("SELECT id FROM groups WHERE id = ?")
            .bind(group_id)
            .fetch_optional(&self.db.pool)
            .await?;
        if row.is_none() {
            return Err(ChatError::GroupNotFound(group_id.to_string()));
        }

        let members = sqlx::query("SELECT user_id FROM group_members WHERE group_id = ?")
            .bind(group_id)
            .fetch_all(&self.db.pool)
            .await?
            .iter()
            .map(|r| r.get::<String, _>("user_id"))
            .collect();

        let muted = sqlx::query("SELECT user_id FROM group_muted WHERE group_id = ?")
            .bind(group_id)
            .fetch_all(&self.db.pool)
            .await?
            .iter()
            .map(|r| r.get::<String, _>("user_id"))
            .collect();

        Ok(GroupSnapshot {
            id: group_id.to_string(),
            members,
            muted,
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub async fn seed_group(db: &Database, group_id: &str, members: &[&str], muted: &[&str]) {
        sqlx::query("INSERT INTO groups (id, name, created_at) VALUES (?, ?, ?)")
            .bind(group_id)
            .bind(group_id)
            .bind(0_i64)
            .execute(&db.pool)
            .await
            .unwrap();
        for member in members {
            sqlx::query("INSERT INTO group_members (group_id, user_id, joined_at) VALUES (?, ?, ?)")
                .bind(group_id)
                .bind(member)
                .bind(0_i64)
                .execute(&db.pool)
                .await
                .unwrap();
        }
        for member in muted {
            sqlx::query("INSERT INTO group_muted (group_id, user_id, muted_at) VALUES (?, ?, ?)")
                .bind(group_id)
                .bind(member)
                .bind(0_i64)
                .execute(&db.pool)
                .await
                .unwrap();
        }
    }
}
