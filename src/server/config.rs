use std::env;

use crate::server::store::DEFAULT_HISTORY_LIMIT;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub max_message_length: usize,
    pub history_limit: i64,
    pub auth_timeout_secs: u64,
    pub enable_tls: bool,
    pub log_level: String,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("SERVER_PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(5000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:data/staffetta.db".to_string()),
            max_message_length: env::var("MAX_MESSAGE_LENGTH").ok().and_then(|v| v.parse().ok()).unwrap_or(2048),
            history_limit: env::var("HISTORY_LIMIT").ok().and_then(|v| v.parse().ok()).unwrap_or(DEFAULT_HISTORY_LIMIT),
            auth_timeout_secs: env::var("AUTH_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(30),
            enable_tls: env::var("ENABLE_TLS").map(|v| v == "true" || v == "1").unwrap_or(false),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        }
    }
}
