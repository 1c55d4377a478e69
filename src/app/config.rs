use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::info;
use url::Url;

use crate::app::paths::AppPaths;
use crate::chat::fallback::FallbackConfig;
use crate::chat::service::ChatServiceConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub chat: ChatDefaults,
    pub fallback: FallbackSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    pub fallback_urls: Vec<String>,
    pub timeout_seconds: u64,
    /// Environment variable the bearer token is read from.
    pub token_env_var: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatDefaults {
    pub user_id: String,
    pub knowledge_ids: Vec<String>,
    pub online_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackSettings {
    pub enabled: bool,
    pub max_attempts: usize,
    pub retry_delay_ms: u64,
    pub failure_threshold: usize,
    pub cooldown_seconds: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                base_url: "http://localhost:8080".to_string(),
                fallback_urls: Vec::new(),
                timeout_seconds: 120,
                token_env_var: "KBCHAT_TOKEN".to_string(),
            },
            chat: ChatDefaults {
                user_id: "local".to_string(),
                knowledge_ids: Vec::new(),
                online_mode: false,
            },
            fallback: FallbackSettings {
                enabled: true,
                max_attempts: 3,
                retry_delay_ms: 500,
                failure_threshold: 5,
                cooldown_seconds: 300,
            },
        }
    }
}

impl AppConfig {
    pub async fn load(paths: &AppPaths) -> Result<Self> {
        let config_file = paths.config_file();

        if !config_file.exists() {
            info!("Config file not found, creating default configuration");
            let default_config = Self::default();
            default_config.save(paths).await?;
            return Ok(default_config);
        }

        Self::load_from(&config_file).await
    }

    pub async fn load_from(config_file: &Path) -> Result<Self> {
        info!("Loading configuration from: {:?}", config_file);

        let config_content = fs::read_to_string(config_file).await?;
        let config: AppConfig = toml::from_str(&config_content)
            .map_err(|e| Error::config(format!("Invalid config file: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, paths: &AppPaths) -> Result<()> {
        let config_file = paths.config_file();

        info!("Saving configuration to: {:?}", config_file);

        let config_content = toml::to_string_pretty(self)
            .map_err(|e| Error::config(format!("Failed to serialize config: {}", e)))?;

        fs::write(&config_file, config_content).await?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.api.base_url)
            .map_err(|e| Error::validation(format!("Invalid base_url: {}", e)))?;
        for url in &self.api.fallback_urls {
            Url::parse(url)
                .map_err(|e| Error::validation(format!("Invalid fallback URL {}: {}", url, e)))?;
        }

        if self.api.timeout_seconds == 0 {
            return Err(Error::validation("timeout_seconds must be greater than zero"));
        }
        if self.api.token_env_var.is_empty() {
            return Err(Error::validation("token_env_var must not be empty"));
        }
        if self.chat.user_id.is_empty() {
            return Err(Error::validation("user_id must not be empty"));
        }
        if self.fallback.enabled && self.fallback.max_attempts == 0 {
            return Err(Error::validation("max_attempts must be greater than zero"));
        }

        Ok(())
    }

    /// Ordered endpoint list for fallback: primary first.
    pub fn endpoints(&self) -> Vec<String> {
        let mut endpoints = vec![self.api.base_url.clone()];
        endpoints.extend(self.api.fallback_urls.iter().cloned());
        endpoints
    }

    pub fn to_service_config(&self) -> ChatServiceConfig {
        ChatServiceConfig {
            base_url: self.api.base_url.clone(),
            timeout: Duration::from_secs(self.api.timeout_seconds),
        }
    }

    pub fn to_fallback_config(&self) -> FallbackConfig {
        FallbackConfig {
            max_attempts: self.fallback.max_attempts,
            retry_delay: Duration::from_millis(self.fallback.retry_delay_ms),
            failure_threshold: self.fallback.failure_threshold,
            cooldown: Duration::from_secs(self.fallback.cooldown_seconds),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.api.token_env_var, "KBCHAT_TOKEN");
        assert_eq!(config.endpoints(), vec![config.api.base_url.clone()]);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.api.base_url = "not a url".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.api.timeout_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.chat.user_id = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_conversion() {
        let config = AppConfig::default();

        let service_config = config.to_service_config();
        assert_eq!(service_config.timeout, Duration::from_secs(120));

        let fallback_config = config.to_fallback_config();
        assert_eq!(fallback_config.max_attempts, 3);
        assert_eq!(fallback_config.cooldown, Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_config_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join("config.toml");

        let mut config = AppConfig::default();
        config.api.fallback_urls = vec!["http://backup.example:8080".to_string()];
        config.chat.knowledge_ids = vec!["kb-1".to_string()];

        let content = toml::to_string_pretty(&config).unwrap();
        tokio::fs::write(&config_file, content).await.unwrap();

        let loaded = AppConfig::load_from(&config_file).await.unwrap();
        assert_eq!(loaded.api.fallback_urls, config.api.fallback_urls);
        assert_eq!(loaded.chat.knowledge_ids, vec!["kb-1".to_string()]);
        assert_eq!(loaded.endpoints().len(), 2);
    }

    #[tokio::test]
    async fn test_load_rejects_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join("config.toml");
        tokio::fs::write(&config_file, "not valid toml [[").await.unwrap();

        assert!(AppConfig::load_from(&config_file).await.is_err());
    }
}
