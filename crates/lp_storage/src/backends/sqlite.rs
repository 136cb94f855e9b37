use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use lp_core::{ArticleStorage, JobId, JobRecord, JobStore, PersistenceError, PolishedArticle, Result};
use sqlx::{sqlite::SqliteConnectOptions, sqlite::SqlitePool, Row};

use crate::StorageBackend;

const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS articles (
        slug TEXT PRIMARY KEY,
        source_id TEXT NOT NULL,
        processed_at TEXT NOT NULL,
        data TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id TEXT PRIMARY KEY,
        status TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        data TEXT NOT NULL
    )
    "#,
    // Add future migrations here
];

pub struct SQLiteStorage {
    pool: Arc<SqlitePool>,
    db_path: PathBuf,
}

fn backend_err(context: &str, e: impl std::fmt::Display) -> PersistenceError {
    PersistenceError::Backend(format!("{context}: {e}"))
}

#[async_trait]
impl StorageBackend for SQLiteStorage {
    fn get_error_message() -> &'static str {
        "SQLite database should be available at <state_dir>/lingopress.db"
    }

    async fn open(state_dir: &Path) -> Result<Self> {
        Self::new_with_path(&state_dir.join("lingopress.db")).await
    }
}

impl SQLiteStorage {
    pub async fn new_with_path(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new().filename(db_path).create_if_missing(true);
        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(|e| backend_err("failed to connect to database", e))?;

        for (i, migration) in MIGRATIONS.iter().enumerate() {
            sqlx::query(migration)
                .execute(&pool)
                .await
                .map_err(|e| backend_err(&format!("failed to run migration {i}"), e))?;
        }

        Ok(Self {
            pool: Arc::new(pool),
            db_path: db_path.to_path_buf(),
        })
    }

    pub fn get_db_path(&self) -> &Path {
        &self.db_path
    }
}

#[async_trait]
impl ArticleStorage for SQLiteStorage {
    async fn save(&self, article: &PolishedArticle) -> std::result::Result<(), PersistenceError> {
        let data = serde_json::to_string(article).map_err(|e| backend_err("failed to serialize article", e))?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO articles (slug, source_id, processed_at, data)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&article.slug)
        .bind(&article.source_id)
        .bind(article.processed_at.to_rfc3339())
        .bind(data)
        .execute(&*self.pool)
        .await
        .map_err(|e| backend_err("failed to store article", e))?;

        Ok(())
    }

    async fn get_by_slug(&self, slug: &str) -> std::result::Result<Option<PolishedArticle>, PersistenceError> {
        let row = sqlx::query("SELECT data FROM articles WHERE slug = ?")
            .bind(slug)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| backend_err("failed to load article", e))?;

        row.map(|row| {
            let data: String = row.get("data");
            serde_json::from_str(&data).map_err(|e| backend_err("corrupt article row", e))
        })
        .transpose()
    }

    async fn list_articles(&self) -> std::result::Result<Vec<PolishedArticle>, PersistenceError> {
        let rows = sqlx::query("SELECT data FROM articles ORDER BY processed_at DESC")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| backend_err("failed to list articles", e))?;

        rows.into_iter()
            .map(|row| {
                let data: String = row.get("data");
                serde_json::from_str(&data).map_err(|e| backend_err("corrupt article row", e))
            })
            .collect()
    }
}

#[async_trait]
impl JobStore for SQLiteStorage {
    async fn save_job(&self, record: &JobRecord) -> std::result::Result<(), PersistenceError> {
        let data = serde_json::to_string(record).map_err(|e| backend_err("failed to serialize job", e))?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO jobs (id, status, updated_at, data)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(record.id().to_string())
        .bind(record.job.status.to_string())
        .bind(record.job.last_updated_at.to_rfc3339())
        .bind(data)
        .execute(&*self.pool)
        .await
        .map_err(|e| backend_err("failed to store job", e))?;

        Ok(())
    }

    async fn load_job(&self, id: JobId) -> std::result::Result<Option<JobRecord>, PersistenceError> {
        let row = sqlx::query("SELECT data FROM jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| backend_err("failed to load job", e))?;

        row.map(|row| {
            let data: String = row.get("data");
            serde_json::from_str(&data).map_err(|e| backend_err("corrupt job row", e))
        })
        .transpose()
    }

    async fn list_jobs(&self) -> std::result::Result<Vec<JobRecord>, PersistenceError> {
        let rows = sqlx::query("SELECT data FROM jobs ORDER BY updated_at DESC")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| backend_err("failed to list jobs", e))?;

        rows.into_iter()
            .map(|row| {
                let data: String = row.get("data");
                serde_json::from_str(&data).map_err(|e| backend_err("corrupt job row", e))
            })
            .collect()
    }
}
