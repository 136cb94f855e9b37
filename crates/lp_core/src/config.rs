use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, JobControlError};
use crate::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Memory,
    File,
    Sqlite,
}

impl FromStr for StorageKind {
    type Err = JobControlError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageKind::Memory),
            "file" => Ok(StorageKind::File),
            "sqlite" => Ok(StorageKind::Sqlite),
            other => Err(JobControlError::InvalidConfig(format!("unknown storage backend: {other}"))),
        }
    }
}

/// Runtime knobs of the pipeline. Every field has a default so a partial
/// JSON file is enough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_concurrent_languages: usize,
    pub fetch_timeout_secs: u64,
    pub rate_limit_backoff_secs: u64,
    pub provider_timeout_secs: u64,
    pub min_call_delay_ms: u64,
    pub catalog_path: Option<PathBuf>,
    pub state_dir: PathBuf,
    pub storage: StorageKind,
    pub model_base_url: Option<String>,
    pub model_name: Option<String>,
    pub api_key_env: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_languages: 3,
            fetch_timeout_secs: 20,
            rate_limit_backoff_secs: 30,
            provider_timeout_secs: 60,
            min_call_delay_ms: 1000,
            catalog_path: None,
            state_dir: PathBuf::from(".lingopress"),
            storage: StorageKind::Memory,
            model_base_url: None,
            model_name: None,
            api_key_env: "LINGOPRESS_API_KEY".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "loaded pipeline config");
        Ok(config)
    }

    /// Loads `path` when given, defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_languages == 0 {
            return Err(Error::JobControl(JobControlError::InvalidConfig(
                "max_concurrent_languages must be at least 1".to_string(),
            )));
        }
        if self.fetch_timeout_secs == 0 || self.provider_timeout_secs == 0 {
            return Err(Error::JobControl(JobControlError::InvalidConfig(
                "timeouts must be non-zero".to_string(),
            )));
        }
        Ok(())
    }

    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok().filter(|k| !k.trim().is_empty())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn min_call_delay(&self) -> Duration {
        Duration::from_millis(self.min_call_delay_ms)
    }

    pub fn rate_limit_backoff(&self) -> Duration {
        Duration::from_secs(self.rate_limit_backoff_secs)
    }
}
