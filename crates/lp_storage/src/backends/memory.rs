use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use lp_core::{ArticleStorage, JobId, JobRecord, JobStore, PersistenceError, PolishedArticle, Result};
use tokio::sync::RwLock;

use crate::StorageBackend;

#[derive(Default)]
pub struct MemoryStore {
    articles: BTreeMap<String, PolishedArticle>,
    jobs: BTreeMap<JobId, JobRecord>,
}

/// Process-local backend. Nothing survives a restart; used for tests and
/// one-shot runs.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    store: Arc<RwLock<MemoryStore>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    fn get_error_message() -> &'static str {
        "Memory storage should be available"
    }

    async fn open(_state_dir: &Path) -> Result<Self> {
        Ok(Self::new())
    }
}

#[async_trait]
impl ArticleStorage for MemoryStorage {
    async fn save(&self, article: &PolishedArticle) -> std::result::Result<(), PersistenceError> {
        let mut store = self.store.write().await;
        store.articles.insert(article.slug.clone(), article.clone());
        Ok(())
    }

    async fn get_by_slug(&self, slug: &str) -> std::result::Result<Option<PolishedArticle>, PersistenceError> {
        let store = self.store.read().await;
        Ok(store.articles.get(slug).cloned())
    }

    async fn list_articles(&self) -> std::result::Result<Vec<PolishedArticle>, PersistenceError> {
        let store = self.store.read().await;
        let mut articles: Vec<PolishedArticle> = store.articles.values().cloned().collect();
        articles.sort_by(|a, b| b.processed_at.cmp(&a.processed_at));
        Ok(articles)
    }
}

#[async_trait]
impl JobStore for MemoryStorage {
    async fn save_job(&self, record: &JobRecord) -> std::result::Result<(), PersistenceError> {
        let mut store = self.store.write().await;
        store.jobs.insert(record.id(), record.clone());
        Ok(())
    }

    async fn load_job(&self, id: JobId) -> std::result::Result<Option<JobRecord>, PersistenceError> {
        let store = self.store.read().await;
        Ok(store.jobs.get(&id).cloned())
    }

    async fn list_jobs(&self) -> std::result::Result<Vec<JobRecord>, PersistenceError> {
        let store = self.store.read().await;
        Ok(store.jobs.values().cloned().collect())
    }
}
