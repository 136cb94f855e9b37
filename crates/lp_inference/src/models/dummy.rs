use std::fmt;

use async_trait::async_trait;
use lp_core::{CompletionModel, ModelConfig, ProviderError};

use crate::prompts::{parse_prompt, Task};

/// Offline provider. Polish returns the text unchanged and translation tags
/// it with the target language, e.g. `[Simplified Chinese] Hello`.
pub struct DummyModel;

impl fmt::Debug for DummyModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DummyModel").finish()
    }
}

#[async_trait]
impl CompletionModel for DummyModel {
    fn name(&self) -> &str {
        "Dummy"
    }

    async fn complete(&self, prompt: &str, _config: &ModelConfig) -> Result<String, ProviderError> {
        let parts = parse_prompt(prompt).ok_or_else(|| ProviderError::Malformed("unrecognised prompt".to_string()))?;
        Ok(match parts.task {
            Task::Polish => parts.text.to_string(),
            Task::Translate => format!("[{}] {}", parts.target, parts.text),
        })
    }
}
