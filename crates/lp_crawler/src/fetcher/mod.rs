use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use lp_core::{FetchError, RawArticle, Source};

pub mod feed;
pub mod http;
pub mod page;
pub mod static_fetcher;
pub mod text;

pub use http::HttpFetcher;
pub use static_fetcher::{StaticFetcher, StaticResponse};

/// Lazy, finite sequence of candidates from one source.
pub type ArticleStream = BoxStream<'static, RawArticle>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    /// Keep only articles published on the current UTC day
    pub date_filter: bool,
    pub timeout: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            date_filter: false,
            timeout: Duration::from_secs(20),
        }
    }
}

impl FetchOptions {
    pub fn accepts(&self, article: &RawArticle) -> bool {
        self.accepts_at(article, Utc::now())
    }

    pub fn accepts_at(&self, article: &RawArticle, now: DateTime<Utc>) -> bool {
        !self.date_filter || article.published_at.date_naive() == now.date_naive()
    }

    /// Publish time for a candidate the source left undated; none while the
    /// date filter is on.
    pub fn undated(&self) -> Option<DateTime<Utc>> {
        (!self.date_filter).then(Utc::now)
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Opens `source` and returns its candidates. Zero articles is a success.
    async fn fetch(&self, source: &Source, options: &FetchOptions) -> Result<ArticleStream, FetchError>;
}
