use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use lp_core::{ArticleStorage, JobStore, Result, StorageKind};

pub mod backends;

pub use backends::*;

#[async_trait]
pub trait StorageBackend: ArticleStorage + JobStore {
    fn get_error_message() -> &'static str
    where
        Self: Sized;

    /// Open the backend rooted at `state_dir`
    async fn open(state_dir: &Path) -> Result<Self>
    where
        Self: Sized;
}

/// Article sink and job store sharing one backend instance.
#[derive(Clone)]
pub struct Storage {
    pub articles: Arc<dyn ArticleStorage>,
    pub jobs: Arc<dyn JobStore>,
}

impl Storage {
    pub fn from_backend<T: StorageBackend + 'static>(backend: T) -> Self {
        let backend = Arc::new(backend);
        Self {
            articles: backend.clone(),
            jobs: backend,
        }
    }
}

async fn open_backend<T: StorageBackend + 'static>(state_dir: &Path) -> Result<Storage> {
    match T::open(state_dir).await {
        Ok(backend) => Ok(Storage::from_backend(backend)),
        Err(e) => {
            tracing::error!(error = %e, "{}", T::get_error_message());
            Err(e)
        }
    }
}

pub async fn create_storage(kind: StorageKind, state_dir: &Path) -> Result<Storage> {
    match kind {
        StorageKind::Memory => open_backend::<MemoryStorage>(state_dir).await,
        StorageKind::File => open_backend::<FileStorage>(state_dir).await,
        #[cfg(feature = "sqlite")]
        StorageKind::Sqlite => open_backend::<SQLiteStorage>(state_dir).await,
        #[cfg(not(feature = "sqlite"))]
        StorageKind::Sqlite => Err(lp_core::Error::JobControl(lp_core::JobControlError::InvalidConfig(
            "sqlite storage requires the `sqlite` feature".to_string(),
        ))),
    }
}

pub mod prelude {
    pub use super::backends::*;
    pub use super::{create_storage, Storage, StorageBackend};
}
