use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::relay::MarkupMode;
use crate::relay::gemini::{DEFAULT_BASE_URL, DEFAULT_MODEL};

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", .path.display())]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("failed to parse config file '{}': {source}", .path.display())]
    ParseJson { path: PathBuf, source: serde_json::Error },
    #[error("config validation error: {0}")]
    Validation(String),
}

#[derive(Deserialize)]
struct ConfigFile {
    telegram_bot_token: String,
    gemini_api_key: String,
    /// Gemini model name, e.g. "gemini-2.5-flash".
    model: Option<String>,
    /// Override for the Gemini API root (proxies, tests).
    gemini_base_url: Option<String>,
    #[serde(default = "default_ai_timeout_secs")]
    ai_timeout_secs: u64,
    #[serde(default)]
    markup_mode: MarkupMode,
    /// Directory for logs. Defaults to current directory.
    data_dir: Option<String>,
}

fn default_ai_timeout_secs() -> u64 {
    60
}

pub struct Config {
    pub telegram_bot_token: String,
    pub gemini_api_key: String,
    pub model: String,
    pub gemini_base_url: String,
    /// Upper bound on one Gemini call.
    pub ai_timeout: Duration,
    pub markup_mode: MarkupMode,
    pub data_dir: PathBuf,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        if file.telegram_bot_token.is_empty() {
            return Err(ConfigError::Validation("telegram_bot_token is required".into()));
        }
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_valid = file
            .telegram_bot_token
            .split_once(':')
            .is_some_and(|(id, secret)| id.parse::<u64>().is_ok() && !secret.is_empty() && !secret.contains(':'));
        if !token_valid {
            return Err(ConfigError::Validation(
                "telegram_bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into()
            ));
        }
        if file.gemini_api_key.trim().is_empty() {
            return Err(ConfigError::Validation("gemini_api_key is required".into()));
        }
        if file.ai_timeout_secs == 0 {
            return Err(ConfigError::Validation("ai_timeout_secs must be greater than 0".into()));
        }

        let model = file
            .model
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let gemini_base_url = file
            .gemini_base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            telegram_bot_token: file.telegram_bot_token,
            gemini_api_key: file.gemini_api_key,
            model,
            gemini_base_url,
            ai_timeout: Duration::from_secs(file.ai_timeout_secs),
            markup_mode: file.markup_mode,
            data_dir,
        })
    }
}
