use std::fmt;

use async_trait::async_trait;
use lp_core::{CompletionModel, ModelConfig, ProviderError};

/// Provider stand-in that refuses every call with `Unavailable`.
pub struct DisabledModel {
    reason: String,
}

impl DisabledModel {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

impl fmt::Debug for DisabledModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisabledModel").field("reason", &self.reason).finish()
    }
}

#[async_trait]
impl CompletionModel for DisabledModel {
    fn name(&self) -> &str {
        "Disabled"
    }

    fn is_available(&self) -> bool {
        false
    }

    async fn complete(&self, _prompt: &str, _config: &ModelConfig) -> Result<String, ProviderError> {
        Err(ProviderError::Unavailable(self.reason.clone()))
    }
}
