use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use lp_core::{FetchError, Source, SourceKind};
use reqwest::header::{HeaderMap, RETRY_AFTER, USER_AGENT};
use reqwest::{Client, StatusCode};
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{feed, page, ArticleStream, FetchOptions, Fetcher};

const AGENT: &str = concat!("lingopress/", env!("CARGO_PKG_VERSION"));

/// Fetches sources over HTTP and remembers rate-limit back-offs per source.
pub struct HttpFetcher {
    client: Client,
    default_backoff: Duration,
    backoff: Mutex<HashMap<String, Instant>>,
}

impl fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpFetcher")
            .field("client", &"<reqwest::Client>")
            .field("default_backoff", &self.default_backoff)
            .finish()
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

fn retry_after(headers: &HeaderMap) -> Option<u64> {
    headers.get(RETRY_AFTER)?.to_str().ok()?.trim().parse().ok()
}

impl HttpFetcher {
    pub fn new(default_backoff: Duration) -> Self {
        Self {
            client: Client::new(),
            default_backoff,
            backoff: Mutex::new(HashMap::new()),
        }
    }

    /// Waits out a pending back-off for `source_id`, unless it outlasts `budget`.
    async fn respect_backoff(&self, source_id: &str, budget: Duration) -> Result<(), FetchError> {
        let deadline = self.backoff.lock().await.get(source_id).copied();
        let Some(deadline) = deadline else {
            return Ok(());
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            self.backoff.lock().await.remove(source_id);
            return Ok(());
        }
        if remaining >= budget {
            return Err(FetchError::RateLimited {
                retry_after_secs: remaining.as_secs().max(1),
            });
        }
        tracing::debug!("Waiting {:?} before hitting {} again", remaining, source_id);
        tokio::time::sleep_until(deadline).await;
        Ok(())
    }

    async fn record_backoff(&self, source_id: &str, secs: u64) {
        let deadline = Instant::now() + Duration::from_secs(secs);
        self.backoff.lock().await.insert(source_id.to_string(), deadline);
    }

    fn map_error(err: reqwest::Error, options: &FetchOptions) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(options.timeout.as_secs())
        } else {
            FetchError::Unreachable(err.to_string())
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, source: &Source, options: &FetchOptions) -> Result<ArticleStream, FetchError> {
        self.respect_backoff(&source.id, options.timeout).await?;

        let response = self
            .client
            .get(&source.endpoint)
            .header(USER_AGENT, AGENT)
            .timeout(options.timeout)
            .send()
            .await
            .map_err(|e| Self::map_error(e, options))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let secs = retry_after(response.headers()).unwrap_or(self.default_backoff.as_secs());
            self.record_backoff(&source.id, secs).await;
            tracing::warn!("{} rate limited us for {}s", source.id, secs);
            return Err(FetchError::RateLimited { retry_after_secs: secs });
        }
        if !status.is_success() {
            return Err(FetchError::Unreachable(format!("{} returned {}", source.endpoint, status)));
        }

        let body = response.text().await.map_err(|e| Self::map_error(e, options))?;
        let articles = match source.kind {
            SourceKind::Rss => feed::parse_feed(&body, source, options)?,
            SourceKind::Html => page::parse_page(&body, source, &source.endpoint, options)?,
        };
        tracing::debug!("Fetched {} candidates from {}", articles.len(), source.id);
        Ok(stream::iter(articles).boxed())
    }
}
