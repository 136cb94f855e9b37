use async_trait::async_trait;

use crate::error::PersistenceError;
use crate::job::{JobId, JobRecord};
use crate::types::{FieldKind, Language, PolishedArticle};

/// Durable sink for finished multi-language articles.
#[async_trait]
pub trait ArticleStorage: Send + Sync {
    /// Store an article, replacing any previous version with the same slug
    async fn save(&self, article: &PolishedArticle) -> Result<(), PersistenceError>;

    async fn get_by_slug(&self, slug: &str) -> Result<Option<PolishedArticle>, PersistenceError>;

    async fn list_articles(&self) -> Result<Vec<PolishedArticle>, PersistenceError>;

    /// Patch a single language of one field, keeping every other key
    async fn add_translation(
        &self,
        slug: &str,
        field: FieldKind,
        language: Language,
        text: &str,
    ) -> Result<PolishedArticle, PersistenceError> {
        let mut article = self
            .get_by_slug(slug)
            .await?
            .ok_or_else(|| PersistenceError::ArticleNotFound(slug.to_string()))?;
        article.field_mut(field).merge(language, text);
        self.save(&article).await?;
        Ok(article)
    }
}

/// Durable job state, keyed by job id.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn save_job(&self, record: &JobRecord) -> Result<(), PersistenceError>;

    async fn load_job(&self, id: JobId) -> Result<Option<JobRecord>, PersistenceError>;

    async fn list_jobs(&self) -> Result<Vec<JobRecord>, PersistenceError>;
}
