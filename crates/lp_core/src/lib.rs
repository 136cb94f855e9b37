pub mod config;
pub mod error;
pub mod job;
pub mod models;
pub mod storage;
pub mod types;

pub use config::{PipelineConfig, StorageKind};
pub use error::{Error, FetchError, JobControlError, PersistenceError, ProviderError};
pub use job::{
    CrawlConfig, CrawlJob, JobId, JobRecord, JobStatus, LanguageProgress, LanguageStatus, UnitCheckpoint,
    DEFAULT_SCOPE,
};
pub use models::{CompletionModel, ModelConfig};
pub use storage::{ArticleStorage, JobStore};
pub use types::{
    make_slug, AiModel, Country, FieldKind, Language, Locale, MultiLanguageContent, PolishedArticle, RawArticle,
    Source, SourceKind,
};

pub type Result<T> = std::result::Result<T, Error>;
