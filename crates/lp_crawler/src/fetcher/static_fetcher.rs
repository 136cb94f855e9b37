use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use lp_core::{FetchError, Language, RawArticle, Source, SourceKind};

use super::{ArticleStream, FetchOptions, Fetcher};

#[derive(Debug, Clone)]
pub enum StaticResponse {
    Articles(Vec<RawArticle>),
    Fail(FetchError),
}

/// Scripted fetcher for offline runs and tests. Records every call.
#[derive(Debug, Default)]
pub struct StaticFetcher {
    responses: HashMap<String, StaticResponse>,
    delay: Option<Duration>,
    calls: Mutex<Vec<String>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_articles(mut self, source_id: &str, articles: Vec<RawArticle>) -> Self {
        self.responses.insert(source_id.to_string(), StaticResponse::Articles(articles));
        self
    }

    /// `count` generated articles for `source`, published now.
    pub fn with_generated(self, source: &Source, count: usize) -> Self {
        let articles = generate_articles(source, count);
        self.with_articles(&source.id, articles)
    }

    pub fn with_failure(mut self, source_id: &str, error: FetchError) -> Self {
        self.responses.insert(source_id.to_string(), StaticResponse::Fail(error));
        self
    }

    /// Sleeps before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Source ids in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn call_count(&self, source_id: &str) -> usize {
        self.calls().iter().filter(|id| *id == source_id).count()
    }
}

pub fn generate_articles(source: &Source, count: usize) -> Vec<RawArticle> {
    (0..count)
        .filter_map(|i| {
            RawArticle::new(
                source,
                format!("{}/article-{i}", source.endpoint.trim_end_matches('/')),
                format!("{} story {i}", source.name),
                format!("Body of story {i} from {}. It has a second sentence.", source.name),
                None,
                Utc::now(),
            )
        })
        .collect()
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, source: &Source, _options: &FetchOptions) -> Result<ArticleStream, FetchError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(source.id.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.responses.get(&source.id) {
            Some(StaticResponse::Articles(articles)) => Ok(stream::iter(articles.clone()).boxed()),
            Some(StaticResponse::Fail(error)) => Err(error.clone()),
            None => Err(FetchError::Unreachable(format!("no scripted response for {}", source.id))),
        }
    }
}

/// Minimal valid source for tests.
pub fn test_source(id: &str, language: Language) -> Source {
    Source {
        id: id.to_string(),
        name: id.to_string(),
        endpoint: format!("https://{id}.example/feed"),
        language,
        country: language.default_country(),
        category: "general".to_string(),
        priority: 5,
        quality_score: 0.5,
        active: true,
        crawl_interval_secs: 3600,
        last_crawled_at: None,
        kind: SourceKind::Rss,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_responses() {
        let ok = test_source("ok", Language::En);
        let bad = test_source("bad", Language::En);
        let fetcher = StaticFetcher::new()
            .with_generated(&ok, 3)
            .with_failure("bad", FetchError::ParseError("broken".to_string()));

        let articles: Vec<RawArticle> =
            fetcher.fetch(&ok, &FetchOptions::default()).await.unwrap().collect().await;
        assert_eq!(articles.len(), 3);
        assert_eq!(articles[2].title, "ok story 2");

        assert!(fetcher.fetch(&bad, &FetchOptions::default()).await.is_err());
        assert!(fetcher.fetch(&test_source("nope", Language::En), &FetchOptions::default()).await.is_err());
        assert_eq!(fetcher.calls(), vec!["ok", "bad", "nope"]);
        assert_eq!(fetcher.call_count("ok"), 1);
    }
}
