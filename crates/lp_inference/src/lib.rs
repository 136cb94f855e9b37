//! AI-assisted translation and editorial polish.
//!
//! Providers implement [`lp_core::CompletionModel`]; [`PolishEngine`] drives
//! them one call at a time and turns a single-language field into a
//! [`lp_core::MultiLanguageContent`].

use std::time::Duration;

pub mod models;
pub mod polish;
pub mod prompts;

/// Provider connection settings.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model_name: Option<String>,
    pub request_timeout: Option<Duration>,
}

impl Config {
    pub fn from_pipeline(pipeline: &lp_core::PipelineConfig) -> Self {
        Self {
            api_key: pipeline.api_key(),
            base_url: pipeline.model_base_url.clone(),
            model_name: pipeline.model_name.clone(),
            request_timeout: Some(pipeline.provider_timeout()),
        }
    }
}

pub mod prelude {
    pub use super::models::create_model;
    pub use super::polish::{ArticlePolish, PolishEngine, PolishOutcome, PolishSettings};
    pub use super::Config;
    pub use lp_core::{CompletionModel, FieldKind, Language, ModelConfig, MultiLanguageContent, ProviderError};
}

pub use models::create_model;
pub use polish::{ArticlePolish, PolishEngine, PolishOutcome, PolishSettings};
