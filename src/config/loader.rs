//! Configuration loader

use config::{Config, Environment, File};
use std::path::Path;

use super::types::{AppConfig, AppSettings, SessionSettings, TachibanaConfig};
use crate::common::errors::{ClientError, Result};

/// Load configuration from file and environment variables
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with APP_)
/// 2. Configuration file (TOML format)
/// 3. Default values
pub fn load_config(config_path: Option<&str>) -> Result<AppConfig> {
    let mut builder = Config::builder();

    if let Some(path) = config_path {
        if Path::new(path).exists() {
            builder = builder.add_source(File::with_name(path).required(false));
        }
    }

    builder = builder.add_source(
        Environment::with_prefix("APP")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder
        .build()
        .map_err(|e| ClientError::Configuration(e.to_string()))?;

    config
        .try_deserialize()
        .map_err(|e| ClientError::Configuration(e.to_string()))
}

/// Load configuration from environment variables only
pub fn load_from_env() -> Result<AppConfig> {
    // Pick up a .env file when present
    dotenvy::dotenv().ok();

    let tachibana = TachibanaConfig {
        user_id: std::env::var("TACHIBANA_USER_ID").ok(),
        password: std::env::var("TACHIBANA_PASSWORD").ok(),
        second_password: std::env::var("TACHIBANA_SECOND_PASSWORD").ok(),
        base_url: std::env::var("TACHIBANA_BASE_URL")
            .unwrap_or_else(|_| "https://kabuka.e-shiten.jp/e_api_v4r5/".to_string()),
    };

    let mut session = SessionSettings::default();
    if let Ok(policy) = std::env::var("TACHIBANA_SESSION_POLICY") {
        session.policy = policy;
    }
    if let Ok(dir) = std::env::var("TACHIBANA_SESSION_DIR") {
        session.record_dir = dir;
    }

    Ok(AppConfig {
        tachibana,
        session,
        settings: AppSettings::default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_any_source() {
        let config = load_config(None).unwrap();
        assert_eq!(config.session.policy, "time");
        assert_eq!(config.settings.max_attempts, 3);
        assert_eq!(config.settings.retry_delay_ms, 2000);
    }
}
