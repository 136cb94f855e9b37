use std::sync::Arc;

use lp_core::{AiModel, CompletionModel};

use crate::Config;

pub mod disabled;
pub mod dummy;
pub mod openai;

pub use disabled::DisabledModel;
pub use dummy::DummyModel;
pub use openai::OpenAiCompatibleModel;

/// Picks the provider for `model`. Hosted providers without an API key and
/// providers whose settings do not parse degrade to [`DisabledModel`], which
/// makes the engine keep original text instead of failing the job.
pub fn create_model(model: AiModel, config: &Config) -> Arc<dyn CompletionModel> {
    match model {
        AiModel::Disabled => Arc::new(DisabledModel::new("provider disabled by configuration")),
        AiModel::Dummy => Arc::new(DummyModel),
        AiModel::DeepSeek | AiModel::OpenAi if config.api_key.is_none() => {
            tracing::warn!("No API key configured for {}, AI polish is disabled", model);
            Arc::new(DisabledModel::new(format!("no API key configured for {model}")))
        }
        AiModel::DeepSeek | AiModel::OpenAi | AiModel::Ollama => match OpenAiCompatibleModel::for_provider(model, config) {
            Ok(m) => Arc::new(m),
            Err(e) => {
                tracing::warn!("Failed to configure {}: {}", model, e);
                Arc::new(DisabledModel::new(e.to_string()))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_disables_hosted_providers() {
        let config = Config::default();
        assert!(!create_model(AiModel::DeepSeek, &config).is_available());
        assert!(!create_model(AiModel::OpenAi, &config).is_available());
        assert!(!create_model(AiModel::Disabled, &config).is_available());
        // local server needs no key
        assert!(create_model(AiModel::Ollama, &config).is_available());
        assert!(create_model(AiModel::Dummy, &config).is_available());
    }

    #[test]
    fn test_bad_base_url_disables() {
        let config = Config {
            api_key: Some("k".to_string()),
            base_url: Some("not a url".to_string()),
            ..Config::default()
        };
        assert!(!create_model(AiModel::DeepSeek, &config).is_available());
    }
}
