use std::path::{Path, PathBuf};

use async_trait::async_trait;
use lp_core::{ArticleStorage, JobId, JobRecord, JobStore, PersistenceError, PolishedArticle, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::StorageBackend;

/// One JSON document per article and per job under a state directory:
///
/// ```text
/// <state_dir>/articles/<slug>.json
/// <state_dir>/jobs/<job id>.json
/// ```
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub async fn new_with_path(root: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(root.join("articles")).await?;
        tokio::fs::create_dir_all(root.join("jobs")).await?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn get_root(&self) -> &Path {
        &self.root
    }

    fn article_path(&self, slug: &str) -> PathBuf {
        self.root.join("articles").join(format!("{slug}.json"))
    }

    fn job_path(&self, id: JobId) -> PathBuf {
        self.root.join("jobs").join(format!("{id}.json"))
    }
}

fn backend_err(context: &str, e: impl std::fmt::Display) -> PersistenceError {
    PersistenceError::Backend(format!("{context}: {e}"))
}

/// Writes through a temp file and renames it over the target so readers never
/// observe a half-written document.
async fn write_json<T: Serialize>(path: &Path, value: &T) -> std::result::Result<(), PersistenceError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| backend_err("failed to serialize", e))?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| backend_err(&format!("failed to write {}", tmp.display()), e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| backend_err(&format!("failed to replace {}", path.display()), e))
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> std::result::Result<Option<T>, PersistenceError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| backend_err(&format!("corrupt document {}", path.display()), e)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(backend_err(&format!("failed to read {}", path.display()), e)),
    }
}

async fn read_dir_json<T: DeserializeOwned>(dir: &Path) -> std::result::Result<Vec<T>, PersistenceError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| backend_err(&format!("failed to list {}", dir.display()), e))?;
    let mut out = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| backend_err(&format!("failed to list {}", dir.display()), e))?
    {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match read_json(&path).await {
            Ok(Some(value)) => out.push(value),
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "skipping unreadable document"),
        }
    }
    Ok(out)
}

#[async_trait]
impl StorageBackend for FileStorage {
    fn get_error_message() -> &'static str {
        "State directory should be writable"
    }

    async fn open(state_dir: &Path) -> Result<Self> {
        Self::new_with_path(state_dir).await
    }
}

#[async_trait]
impl ArticleStorage for FileStorage {
    async fn save(&self, article: &PolishedArticle) -> std::result::Result<(), PersistenceError> {
        write_json(&self.article_path(&article.slug), article).await
    }

    async fn get_by_slug(&self, slug: &str) -> std::result::Result<Option<PolishedArticle>, PersistenceError> {
        read_json(&self.article_path(slug)).await
    }

    async fn list_articles(&self) -> std::result::Result<Vec<PolishedArticle>, PersistenceError> {
        let mut articles: Vec<PolishedArticle> = read_dir_json(&self.root.join("articles")).await?;
        articles.sort_by(|a, b| b.processed_at.cmp(&a.processed_at));
        Ok(articles)
    }
}

#[async_trait]
impl JobStore for FileStorage {
    async fn save_job(&self, record: &JobRecord) -> std::result::Result<(), PersistenceError> {
        write_json(&self.job_path(record.id()), record).await
    }

    async fn load_job(&self, id: JobId) -> std::result::Result<Option<JobRecord>, PersistenceError> {
        read_json(&self.job_path(id)).await
    }

    async fn list_jobs(&self) -> std::result::Result<Vec<JobRecord>, PersistenceError> {
        read_dir_json(&self.root.join("jobs")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::fixtures;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_file_storage_survives_reopen() {
        let temp_dir = tempdir().unwrap();
        let record = fixtures::record();
        {
            let storage = FileStorage::new_with_path(temp_dir.path()).await.unwrap();
            storage.save(&fixtures::article("a-1")).await.unwrap();
            storage.save_job(&record).await.unwrap();
        }

        let storage = FileStorage::new_with_path(temp_dir.path()).await.unwrap();
        assert!(storage.get_by_slug("a-1").await.unwrap().is_some());
        assert_eq!(storage.load_job(record.id()).await.unwrap(), Some(record));
        assert_eq!(storage.list_jobs().await.unwrap().len(), 1);
        let leftovers = std::fs::read_dir(temp_dir.path().join("jobs"))
            .unwrap()
            .filter(|e| e.as_ref().unwrap().path().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_corrupt_job_is_skipped_in_listing() {
        let temp_dir = tempdir().unwrap();
        let storage = FileStorage::new_with_path(temp_dir.path()).await.unwrap();
        storage.save_job(&fixtures::record()).await.unwrap();
        std::fs::write(temp_dir.path().join("jobs").join("broken.json"), b"{not json").unwrap();

        assert_eq!(storage.list_jobs().await.unwrap().len(), 1);
    }
}
