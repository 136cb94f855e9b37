use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use lp_core::{CompletionModel, FieldKind, Language, ModelConfig, MultiLanguageContent, ProviderError, RawArticle};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::prompts;

#[derive(Debug, Clone)]
pub struct PolishSettings {
    /// Minimum gap between the end of one provider call and the start of the next
    pub min_call_delay: Duration,
    pub call_timeout: Duration,
    pub model_config: ModelConfig,
}

impl Default for PolishSettings {
    fn default() -> Self {
        Self {
            min_call_delay: Duration::from_secs(1),
            call_timeout: Duration::from_secs(60),
            model_config: ModelConfig::new(""),
        }
    }
}

impl PolishSettings {
    pub fn from_pipeline(config: &lp_core::PipelineConfig) -> Self {
        Self {
            min_call_delay: config.min_call_delay(),
            call_timeout: config.provider_timeout(),
            model_config: ModelConfig::new(config.model_name.clone().unwrap_or_default()),
        }
    }
}

/// Result of polishing one field.
#[derive(Debug, Clone, PartialEq)]
pub struct PolishOutcome {
    pub content: MultiLanguageContent,
    /// Languages whose entry was omitted, with the provider error that caused it
    pub failures: BTreeMap<Language, ProviderError>,
}

/// Polished title, content and summary of one article.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticlePolish {
    pub title: MultiLanguageContent,
    pub content: MultiLanguageContent,
    pub summary: MultiLanguageContent,
    pub failures: BTreeMap<Language, ProviderError>,
}

impl ArticlePolish {
    /// `"zh: provider quota exceeded: ..., fr: ..."`, or `None` when nothing failed.
    pub fn failure_summary(&self) -> Option<String> {
        if self.failures.is_empty() {
            return None;
        }
        Some(
            self.failures
                .iter()
                .map(|(lang, err)| format!("{lang}: {err}"))
                .collect::<Vec<_>>()
                .join(", "),
        )
    }
}

/// Drives a [`CompletionModel`] one call at a time.
#[derive(Debug)]
pub struct PolishEngine {
    model: Arc<dyn CompletionModel>,
    settings: PolishSettings,
    // Held for the duration of a call; stores when the last call finished.
    gate: Mutex<Option<Instant>>,
}

impl PolishEngine {
    pub fn new(model: Arc<dyn CompletionModel>, settings: PolishSettings) -> Self {
        Self {
            model,
            settings,
            gate: Mutex::new(None),
        }
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    pub fn is_available(&self) -> bool {
        self.model.is_available()
    }

    /// Polishes `text` in its own language and produces one entry per target.
    ///
    /// Returns `None` only for blank input. Provider failures never surface as
    /// errors: see [`PolishOutcome::failures`].
    pub async fn polish_field(
        &self,
        text: &str,
        field: FieldKind,
        source: Language,
        targets: &[Language],
    ) -> Option<PolishOutcome> {
        let original = text.trim();
        if original.is_empty() {
            return None;
        }

        let default = if self.model.is_available() {
            match self.call(prompts::polish_prompt(original, field, source), field).await {
                Ok(polished) => polished,
                Err(e) => {
                    tracing::warn!("Polishing {} in {} failed, keeping original: {}", field, source, e);
                    original.to_string()
                }
            }
        } else {
            original.to_string()
        };

        let mut content = MultiLanguageContent::new(default)?;
        let failures = self.translate_into(&mut content, original, field, source, targets).await;
        Some(PolishOutcome { content, failures })
    }

    /// Adds the `targets` entries to `existing` without touching the others.
    pub async fn polish_into(
        &self,
        existing: &mut MultiLanguageContent,
        original: &str,
        field: FieldKind,
        source: Language,
        targets: &[Language],
    ) -> BTreeMap<Language, ProviderError> {
        let original = original.trim();
        if original.is_empty() {
            return BTreeMap::new();
        }
        self.translate_into(existing, original, field, source, targets).await
    }

    /// Runs [`Self::polish_field`] over title, content and summary.
    pub async fn polish_article(&self, article: &RawArticle, targets: &[Language]) -> Option<ArticlePolish> {
        let title = self.polish_field(&article.title, FieldKind::Title, article.language, targets).await?;
        let content = self.polish_field(&article.body, FieldKind::Content, article.language, targets).await?;
        let summary = self.polish_field(&article.summary, FieldKind::Summary, article.language, targets).await?;

        let mut failures = BTreeMap::new();
        for outcome in [&title, &content, &summary] {
            for (lang, err) in &outcome.failures {
                failures.entry(*lang).or_insert_with(|| err.clone());
            }
        }
        Some(ArticlePolish {
            title: title.content,
            content: content.content,
            summary: summary.content,
            failures,
        })
    }

    async fn translate_into(
        &self,
        content: &mut MultiLanguageContent,
        original: &str,
        field: FieldKind,
        source: Language,
        targets: &[Language],
    ) -> BTreeMap<Language, ProviderError> {
        let mut failures = BTreeMap::new();
        let mut seen = Vec::with_capacity(targets.len());

        for &target in targets {
            if seen.contains(&target) {
                continue;
            }
            seen.push(target);

            if target == source {
                let polished = content.default_text().to_string();
                content.merge(target, polished);
                continue;
            }
            if !self.model.is_available() {
                content.merge(target, original);
                continue;
            }

            match self.translate(original, field, source, target).await {
                Ok(text) => content.merge(target, text),
                Err(ProviderError::Unavailable(reason)) => {
                    tracing::warn!("Provider unavailable for {} {}, keeping original: {}", target, field, reason);
                    content.merge(target, original);
                }
                Err(e) => {
                    tracing::warn!("Translating {} into {} failed: {}", field, target, e);
                    failures.insert(target, e);
                }
            }
        }
        failures
    }

    async fn translate(
        &self,
        original: &str,
        field: FieldKind,
        source: Language,
        target: Language,
    ) -> Result<String, ProviderError> {
        let translated = self.call(prompts::translate_prompt(original, field, source, target), field).await?;
        match self.call(prompts::polish_prompt(&translated, field, target), field).await {
            Ok(polished) => Ok(polished),
            Err(e) => {
                tracing::debug!("Polish after translation into {} failed, using raw translation: {}", target, e);
                Ok(translated)
            }
        }
    }

    async fn call(&self, prompt: String, field: FieldKind) -> Result<String, ProviderError> {
        let mut last = self.gate.lock().await;
        if let Some(finished) = *last {
            let wait = self.settings.min_call_delay.saturating_sub(finished.elapsed());
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
        }

        let result = tokio::time::timeout(
            self.settings.call_timeout,
            self.model.complete(&prompt, &self.settings.model_config),
        )
        .await;
        *last = Some(Instant::now());

        let raw = result.map_err(|_| ProviderError::Timeout(self.settings.call_timeout.as_secs()))??;
        prompts::clean_output(&raw, field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DisabledModel, DummyModel};
    use crate::prompts::{parse_prompt, Task};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn settings() -> PolishSettings {
        PolishSettings {
            min_call_delay: Duration::ZERO,
            call_timeout: Duration::from_secs(5),
            model_config: ModelConfig::new("test"),
        }
    }

    /// Translates by tagging; refuses some targets with a fixed error.
    #[derive(Debug)]
    struct FlakyModel {
        fail: BTreeMap<&'static str, ProviderError>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CompletionModel for FlakyModel {
        fn name(&self) -> &str {
            "Flaky"
        }

        async fn complete(&self, prompt: &str, _config: &ModelConfig) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let parts = parse_prompt(prompt).unwrap();
            if parts.task == Task::Translate {
                if let Some(err) = self.fail.get(parts.target) {
                    return Err(err.clone());
                }
                return Ok(format!("\"{}:{}\"", parts.target, parts.text));
            }
            Ok(parts.text.to_string())
        }
    }

    #[tokio::test]
    async fn test_disabled_provider_keeps_original() {
        let engine = PolishEngine::new(Arc::new(DisabledModel::new("off")), settings());
        let outcome = engine
            .polish_field("Hello", FieldKind::Title, Language::En, &[Language::Zh])
            .await
            .unwrap();
        assert_eq!(outcome.content.default_text(), "Hello");
        assert_eq!(outcome.content.get(Language::Zh), Some("Hello"));
        assert_eq!(outcome.content.len(), 1);
        assert!(outcome.failures.is_empty());
    }

    #[tokio::test]
    async fn test_failure_is_isolated_per_language() {
        let model = FlakyModel {
            fail: BTreeMap::from([("French", ProviderError::QuotaExceeded("429".to_string()))]),
            calls: AtomicUsize::new(0),
        };
        let engine = PolishEngine::new(Arc::new(model), settings());
        let outcome = engine
            .polish_field("Hello", FieldKind::Title, Language::En, &[Language::Zh, Language::Fr, Language::En])
            .await
            .unwrap();

        assert_eq!(outcome.content.default_text(), "Hello");
        assert_eq!(outcome.content.get(Language::Zh), Some("Simplified Chinese:Hello"));
        assert_eq!(outcome.content.get(Language::En), Some("Hello"));
        assert_eq!(outcome.content.get(Language::Fr), None);
        assert!(matches!(outcome.failures.get(&Language::Fr), Some(ProviderError::QuotaExceeded(_))));
    }

    #[tokio::test]
    async fn test_unavailable_falls_back_to_original() {
        let model = FlakyModel {
            fail: BTreeMap::from([("German", ProviderError::Unavailable("down".to_string()))]),
            calls: AtomicUsize::new(0),
        };
        let engine = PolishEngine::new(Arc::new(model), settings());
        let outcome = engine
            .polish_field("Hola", FieldKind::Summary, Language::Es, &[Language::De])
            .await
            .unwrap();
        assert_eq!(outcome.content.get(Language::De), Some("Hola"));
        assert!(outcome.failures.is_empty());
    }

    #[tokio::test]
    async fn test_blank_input_is_rejected() {
        let engine = PolishEngine::new(Arc::new(DummyModel), settings());
        assert!(engine.polish_field("  ", FieldKind::Title, Language::En, &[]).await.is_none());
    }

    #[tokio::test]
    async fn test_polish_into_only_adds_keys() {
        let engine = PolishEngine::new(Arc::new(DummyModel), settings());
        let mut content = MultiLanguageContent::new("Hello").unwrap();
        content.merge(Language::Fr, "Bonjour");

        let failures = engine
            .polish_into(&mut content, "Hello", FieldKind::Title, Language::En, &[Language::Ja])
            .await;
        assert!(failures.is_empty());
        assert_eq!(content.get(Language::Fr), Some("Bonjour"));
        assert_eq!(content.get(Language::Ja), Some("[Japanese] Hello"));
        assert_eq!(content.default_text(), "Hello");
    }

    #[tokio::test]
    async fn test_article_failures_are_collected() {
        let model = FlakyModel {
            fail: BTreeMap::from([("Korean", ProviderError::Malformed("junk".to_string()))]),
            calls: AtomicUsize::new(0),
        };
        let engine = PolishEngine::new(Arc::new(model), settings());
        let source = lp_core::Source {
            id: "bbc".to_string(),
            name: "BBC".to_string(),
            endpoint: "https://bbc.example/rss".to_string(),
            language: Language::En,
            country: "GB".parse().unwrap(),
            category: "world".to_string(),
            priority: 5,
            quality_score: 0.5,
            active: true,
            crawl_interval_secs: 3600,
            last_crawled_at: None,
            kind: Default::default(),
        };
        let article =
            RawArticle::new(&source, "https://bbc.example/a", "Title", "Body text.", None, chrono::Utc::now()).unwrap();
        let polish = engine.polish_article(&article, &[Language::Ko, Language::Zh]).await.unwrap();
        assert_eq!(polish.title.get(Language::Zh), Some("Simplified Chinese:Title"));
        assert_eq!(polish.summary.default_text(), "Body text.");
        assert!(polish.failure_summary().unwrap().starts_with("ko: malformed provider output"));
    }

    #[tokio::test]
    async fn test_calls_are_spaced() {
        let model = Arc::new(FlakyModel {
            fail: BTreeMap::new(),
            calls: AtomicUsize::new(0),
        });
        let engine = PolishEngine::new(
            model.clone(),
            PolishSettings {
                min_call_delay: Duration::from_millis(30),
                ..settings()
            },
        );
        let started = std::time::Instant::now();
        engine.polish_field("Hi", FieldKind::Title, Language::En, &[Language::Fr]).await.unwrap();
        // polish default, translate, polish translation
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[derive(Debug)]
    struct SlowModel;

    #[async_trait]
    impl CompletionModel for SlowModel {
        fn name(&self) -> &str {
            "Slow"
        }

        async fn complete(&self, _prompt: &str, _config: &ModelConfig) -> Result<String, ProviderError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".to_string())
        }
    }

    #[tokio::test]
    async fn test_timeout_is_a_language_failure() {
        let engine = PolishEngine::new(
            Arc::new(SlowModel),
            PolishSettings {
                call_timeout: Duration::from_millis(20),
                ..settings()
            },
        );
        let outcome = engine
            .polish_field("Hello", FieldKind::Title, Language::En, &[Language::It])
            .await
            .unwrap();
        assert_eq!(outcome.content.default_text(), "Hello");
        assert!(matches!(outcome.failures.get(&Language::It), Some(ProviderError::Timeout(_))));
    }
}
