use anyhow::Result;
use serde::Deserialize;
use std::fs;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub jwt_secret: String,
    #[serde(default = "default_jwt_expiry")]
    pub jwt_expiry_seconds: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            jwt_expiry_seconds: default_jwt_expiry(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_place_chat_window_hours")]
    pub place_chat_window_hours: u32,
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    #[serde(default = "default_reaper_interval_secs")]
    pub reaper_interval_secs: u64,
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    #[serde(default = "default_typing_ttl_secs")]
    pub typing_ttl_secs: u64,
    #[serde(default = "default_dm_request_limit")]
    pub dm_request_limit: usize,
    #[serde(default = "default_dm_request_window_secs")]
    pub dm_request_window_secs: u64,
    #[serde(default = "default_dm_message_limit")]
    pub dm_message_limit: usize,
    #[serde(default = "default_dm_message_window_secs")]
    pub dm_message_window_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            place_chat_window_hours: default_place_chat_window_hours(),
            send_timeout_ms: default_send_timeout_ms(),
            reaper_interval_secs: default_reaper_interval_secs(),
            stale_after_secs: default_stale_after_secs(),
            typing_ttl_secs: default_typing_ttl_secs(),
            dm_request_limit: default_dm_request_limit(),
            dm_request_window_secs: default_dm_request_window_secs(),
            dm_message_limit: default_dm_message_limit(),
            dm_message_window_secs: default_dm_message_window_secs(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".into()
}

fn default_database_url() -> String {
    "sqlite://./data/waypoint.db?mode=rwc".into()
}

fn default_max_connections() -> u32 {
    10
}

fn default_jwt_expiry() -> u64 {
    3600
}

fn default_place_chat_window_hours() -> u32 {
    12
}

fn default_send_timeout_ms() -> u64 {
    5000
}

fn default_reaper_interval_secs() -> u64 {
    30
}

fn default_stale_after_secs() -> u64 {
    120
}

fn default_typing_ttl_secs() -> u64 {
    5
}

fn default_dm_request_limit() -> usize {
    5
}

fn default_dm_request_window_secs() -> u64 {
    60
}

fn default_dm_message_limit() -> usize {
    30
}

fn default_dm_message_window_secs() -> u64 {
    60
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if std::path::Path::new(path).exists() {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            tracing::info!("config file not found at '{path}', using defaults");
            Config::default()
        };

        // Environment variable overrides
        if let Ok(value) = std::env::var("WAYPOINT_BIND_ADDRESS") {
            config.server.bind_address = value;
        }
        if let Ok(value) = std::env::var("WAYPOINT_DATABASE_URL") {
            config.database.url = value;
        }
        if let Ok(value) = std::env::var("WAYPOINT_JWT_SECRET") {
            config.auth.jwt_secret = value;
        }

        if config.auth.jwt_secret.is_empty() {
            config.auth.jwt_secret = format!(
                "{}{}",
                uuid::Uuid::new_v4().simple(),
                uuid::Uuid::new_v4().simple()
            );
            tracing::warn!(
                "no jwt_secret configured; generated an ephemeral one, tokens will not survive a restart"
            );
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            bind_address = "127.0.0.1:9000"

            [chat]
            place_chat_window_hours = 6
            "#,
        )
        .unwrap();

        assert_eq!(config.server.bind_address, "127.0.0.1:9000");
        assert_eq!(config.chat.place_chat_window_hours, 6);
        assert_eq!(config.chat.dm_request_limit, 5);
        assert_eq!(config.chat.stale_after_secs, 120);
        assert_eq!(config.database.max_connections, 10);
    }

    #[test]
    fn empty_input_is_a_complete_config() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.bind_address, "0.0.0.0:8080");
        assert_eq!(config.chat.dm_message_limit, 30);
        assert_eq!(config.auth.jwt_expiry_seconds, 3600);
    }
}
