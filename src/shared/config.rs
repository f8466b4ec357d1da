use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub api: ApiConfig,
    pub push: PushConfig,
    pub mutation: MutationConfig,
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default)]
    pub auth_token: Option<String>,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    pub url: String,
    pub reconnect_delay_ms: u64,
    pub reconnect_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationConfig {
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub poll_interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                base_url: "http://localhost:5000/api".to_string(),
                auth_token: None,
                request_timeout_secs: 30,
            },
            push: PushConfig {
                url: "ws://localhost:5000/ws".to_string(),
                reconnect_delay_ms: 1_000,
                reconnect_attempts: 5,
            },
            mutation: MutationConfig { timeout_secs: 30 },
            notifications: NotificationConfig {
                poll_interval_secs: 30,
            },
        }
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl PushConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl MutationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl NotificationConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("TASKBOARD_API_URL") {
            let trimmed = v.trim();
            if !trimmed.is_empty() {
                cfg.api.base_url = trimmed.trim_end_matches('/').to_string();
            }
        }
        if let Ok(v) = std::env::var("TASKBOARD_AUTH_TOKEN") {
            let trimmed = v.trim();
            cfg.api.auth_token = if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            };
        }
        if let Some(value) = env_u64("TASKBOARD_REQUEST_TIMEOUT_SECS") {
            cfg.api.request_timeout_secs = value.max(1);
        }

        if let Ok(v) = std::env::var("TASKBOARD_SOCKET_URL") {
            let trimmed = v.trim();
            if !trimmed.is_empty() {
                cfg.push.url = trimmed.to_string();
            }
        }
        if let Some(value) = env_u64("TASKBOARD_RECONNECT_DELAY_MS") {
            cfg.push.reconnect_delay_ms = value;
        }
        if let Ok(v) = std::env::var("TASKBOARD_RECONNECT_ATTEMPTS") {
            if let Some(value) = parse_u32(&v) {
                cfg.push.reconnect_attempts = value;
            }
        }

        if let Some(value) = env_u64("TASKBOARD_MUTATION_TIMEOUT_SECS") {
            cfg.mutation.timeout_secs = value.max(1);
        }
        if let Some(value) = env_u64("TASKBOARD_NOTIFICATION_POLL_SECS") {
            cfg.notifications.poll_interval_secs = value.max(1);
        }

        cfg
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.api.base_url.trim().is_empty() {
            return Err("API base_url must not be empty".to_string());
        }
        if self.api.request_timeout_secs == 0 {
            return Err("API request_timeout_secs must be greater than 0".to_string());
        }
        if self.push.url.trim().is_empty() {
            return Err("Push url must not be empty".to_string());
        }
        if self.mutation.timeout_secs == 0 {
            return Err("Mutation timeout_secs must be greater than 0".to_string());
        }
        if self.notifications.poll_interval_secs == 0 {
            return Err("Notification poll_interval_secs must be greater than 0".to_string());
        }
        Ok(())
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| parse_u64(&v))
}

fn parse_u64(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok()
}

fn parse_u32(value: &str) -> Option<u32> {
    value.trim().parse::<u32>().ok()
}
