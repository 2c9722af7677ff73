//! # Configuration Management
//!
//! Loads application configuration from, in priority order:
//! environment variables (`APP_` prefix, `__` separator), an optional
//! `config.toml`, and built-in defaults. `HOST`/`PORT` are honored as
//! overrides for deployment platforms that set them directly.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub models: ModelsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory uploaded audio bytes are written to.
    pub audio_dir: PathBuf,
    /// SQLite database file holding transcription records.
    pub database_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Whisper model size: tiny, base, small, medium or large.
    pub whisper_model: String,
    /// Two-letter language hint; empty means autodetect.
    pub language: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 9090,
            },
            storage: StorageConfig {
                audio_dir: PathBuf::from("audio_storage"),
                database_path: PathBuf::from("data/transcriptions.db"),
            },
            models: ModelsConfig {
                whisper_model: "tiny".to_string(),
                language: "en".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            // Example: APP_SERVER__PORT=3000 becomes server.port.
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        // Deployment platforms commonly inject these without the APP_ prefix.
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }
        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Reject configurations that cannot work before the server starts.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.storage.audio_dir.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("Audio storage directory cannot be empty"));
        }

        if self.storage.database_path.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("Database path cannot be empty"));
        }

        self.models
            .whisper_model
            .parse::<crate::transcription::ModelSize>()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.models.whisper_model, "tiny");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_rejects_port_zero() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_rejects_unknown_model() {
        let mut config = AppConfig::default();
        config.models.whisper_model = "enormous".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_rejects_empty_storage() {
        let mut config = AppConfig::default();
        config.storage.audio_dir = PathBuf::new();
        assert!(config.validate().is_err());
    }
}
