pub mod catalog;
pub mod cli;
pub mod fetcher;
pub mod logging;
pub mod manager;

pub use catalog::{SourceCatalog, SourceFilter};
pub use cli::{handle_command, SourceArgs, SourceCommands};
pub use fetcher::{ArticleStream, FetchOptions, Fetcher, HttpFetcher, StaticFetcher};
pub use manager::{CancelAck, CrawlManager, CrawlService, ManagerSettings, ModelFactory, RetryOutcome};

pub mod prelude {
    pub use super::catalog::SourceCatalog;
    pub use super::fetcher::Fetcher;
    pub use super::manager::{CrawlManager, CrawlService};
    pub use lp_core::{CrawlConfig, CrawlJob, Error, JobId, Result};
}
