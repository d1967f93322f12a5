//! Configuration types

use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Tachibana-specific configuration
    #[serde(default)]
    pub tachibana: TachibanaConfig,
    /// Session lifecycle settings
    #[serde(default)]
    pub session: SessionSettings,
    /// General application settings
    #[serde(default)]
    pub settings: AppSettings,
}

/// Tachibana platform configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TachibanaConfig {
    /// Account user ID
    #[serde(default)]
    pub user_id: Option<String>,
    /// Login password
    #[serde(default)]
    pub password: Option<String>,
    /// Secondary trade-authorization password
    #[serde(default)]
    pub second_password: Option<String>,
    /// Base URL of the authentication endpoint
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for TachibanaConfig {
    fn default() -> Self {
        Self {
            user_id: None,
            password: None,
            second_password: None,
            base_url: default_base_url(),
        }
    }
}

fn default_base_url() -> String {
    "https://kabuka.e-shiten.jp/e_api_v4r5/".to_string()
}

/// Session lifecycle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Session policy: "time" re-authenticates after a timeout,
    /// "date" keeps one session per business day with durable records
    #[serde(default = "default_policy")]
    pub policy: String,
    /// Time-based policy: session lifetime in seconds
    #[serde(default = "default_session_timeout")]
    pub timeout_seconds: u64,
    /// Date-based policy: directory for session record files
    #[serde(default = "default_session_dir")]
    pub record_dir: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            policy: default_policy(),
            timeout_seconds: default_session_timeout(),
            record_dir: default_session_dir(),
        }
    }
}

fn default_policy() -> String {
    "time".to_string()
}

fn default_session_timeout() -> u64 {
    8 * 60 * 60
}

fn default_session_dir() -> String {
    "./data/sessions".to_string()
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Retry attempts per request exchange
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay between retry attempts in milliseconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    2000
}

fn default_request_timeout() -> u64 {
    60
}
