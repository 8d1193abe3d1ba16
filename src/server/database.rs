use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

#[derive(Debug, Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        log::info!("[DB] Connecting to database: {}", database_url);

        // Strip the sqlite scheme and any query parameters to get the file path
        let file_path = if let Some(rest) = database_url.strip_prefix("sqlite://") {
            rest
        } else if let Some(rest) = database_url.strip_prefix("sqlite:") {
            rest
        } else {
            database_url
        };
        let file_path = file_path.split('?').next().unwrap_or(file_path);

        let in_memory = file_path.contains(":memory:");
        if !in_memory {
            if let Some(parent) = std::path::Path::new(file_path).parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| sqlx::Error::Configuration(Box::new(e)))?;
                    log::info!("[DB] Created database directory {:?}", parent);
                }
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // An in-memory database exists per connection, so the pool must not
        // hand out more than one.
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .connect_with(options)
            .await?;

        log::info!("[DB] Database connection established");
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        // Messages: the only durable state owned by the engine
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sender_id TEXT NOT NULL,
                receiver_id TEXT,
                group_id TEXT,
                content TEXT NOT NULL,
                kind TEXT NOT NULL DEFAULT 'text',
                sent_at INTEGER NOT NULL,
                is_read INTEGER NOT NULL DEFAULT 0
            );
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_direct ON messages (sender_id, receiver_id, sent_at);",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_group ON messages (group_id, sent_at);",
        )
        .execute(&self.pool)
        .await?;

        // Sessions, read by the identity collaborator; issued elsewhere
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                user_id TEXT NOT NULL,
                session_token TEXT PRIMARY KEY,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            );
        "#,
        )
        .execute(&self.pool)
        .await?;

        // Groups, read by the group snapshot collaborator; administered elsewhere
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS groups (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS group_members (
                group_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                joined_at INTEGER NOT NULL,
                PRIMARY KEY (group_id, user_id)
            );
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS group_muted (
                group_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                muted_at INTEGER NOT NULL,
                PRIMARY KEY (group_id, user_id)
            );
        "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
