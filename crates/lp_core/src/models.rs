use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Per-call knobs passed to the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl ModelConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: 0.3,
            max_tokens: 4096,
        }
    }
}

#[async_trait]
pub trait CompletionModel: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// `false` for providers that are disabled or missing credentials
    fn is_available(&self) -> bool {
        true
    }

    /// Send one prompt and return the raw completion text
    async fn complete(&self, prompt: &str, config: &ModelConfig) -> Result<String, ProviderError>;
}
