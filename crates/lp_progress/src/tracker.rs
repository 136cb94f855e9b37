use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use lp_core::{CrawlConfig, CrawlJob, JobId, JobRecord, JobStatus, JobStore, Locale};
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::errors::ProgressError;

pub type ProgressResult<T> = Result<T, ProgressError>;

/// Outcome of a start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Begin {
    Started(JobId),
    /// A job was already active in the requested scope
    Existing(JobId),
}

impl Begin {
    pub fn job_id(self) -> JobId {
        match self {
            Begin::Started(id) | Begin::Existing(id) => id,
        }
    }
}

/// One job in the arena: the record behind its writer lock and the last
/// published snapshot.
struct JobSlot {
    record: Mutex<JobRecord>,
    snapshot: watch::Sender<CrawlJob>,
}

impl JobSlot {
    fn new(record: JobRecord) -> Arc<Self> {
        let (snapshot, _) = watch::channel(record.job.clone());
        Arc::new(Self {
            record: Mutex::new(record),
            snapshot,
        })
    }
}

/// Single source of truth for job and per-language progress.
///
/// Every mutation of a job goes through [`ProgressTracker::update`], which
/// holds that job's writer lock, re-derives the job status, persists the full
/// record and then publishes a snapshot. Readers only ever see published
/// snapshots, so concurrent language workers cannot lose updates and polling
/// never observes a half-applied change.
pub struct ProgressTracker {
    store: Arc<dyn JobStore>,
    jobs: RwLock<HashMap<JobId, Arc<JobSlot>>>,
    active: Mutex<HashMap<String, JobId>>,
}

impl ProgressTracker {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            jobs: RwLock::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a new job in `crawling`, or returns the job already active in
    /// the same scope. Scopes this process has not seen yet are looked up in
    /// the job store first.
    pub async fn begin(
        &self,
        config: CrawlConfig,
        sources_per_locale: &BTreeMap<Locale, u32>,
    ) -> ProgressResult<Begin> {
        let mut active = self.active.lock().await;
        if !active.contains_key(&config.scope) {
            if let Some(record) = self.persisted_active(&config.scope).await? {
                let id = record.id();
                self.insert_slot(record).await;
                active.insert(config.scope.clone(), id);
            }
        }
        if let Some(id) = active.get(&config.scope).copied() {
            if let Some(slot) = self.slot(id).await {
                if !slot.snapshot.borrow().status.is_terminal() {
                    debug!(job_id = %id, scope = %config.scope, "job already active");
                    return Ok(Begin::Existing(id));
                }
            }
        }

        let mut job = CrawlJob::new(config, sources_per_locale);
        job.status = JobStatus::Crawling;
        let record = JobRecord::new(job);
        self.store.save_job(&record).await?;

        let id = record.id();
        let scope = record.job.config.scope.clone();
        self.jobs.write().await.insert(id, JobSlot::new(record));
        active.insert(scope, id);
        info!(job_id = %id, "job registered");
        Ok(Begin::Started(id))
    }

    /// Puts a persisted record back into the arena (restart path).
    pub async fn adopt(&self, record: JobRecord) -> JobId {
        let id = record.id();
        let scope = record.job.config.scope.clone();
        if record.job.status.is_terminal() {
            return id;
        }
        self.insert_slot(record).await;
        match self.active.lock().await.entry(scope) {
            Entry::Vacant(entry) => {
                entry.insert(id);
            }
            Entry::Occupied(entry) if *entry.get() != id => {
                warn!(job_id = %id, previous = %entry.get(), scope = %entry.key(), "two active jobs in one scope");
            }
            Entry::Occupied(_) => {}
        }
        id
    }

    /// Loads every non-terminal job from the store into the arena.
    pub async fn load_active(&self) -> ProgressResult<Vec<JobId>> {
        let mut ids = Vec::new();
        for record in self.store.list_jobs().await? {
            if record.job.status.is_terminal() {
                continue;
            }
            if self.slot(record.id()).await.is_some() {
                ids.push(record.id());
                continue;
            }
            ids.push(self.adopt(record).await);
        }
        Ok(ids)
    }

    /// The serialized write path of one job.
    pub async fn update<F, R>(&self, id: JobId, f: F) -> ProgressResult<R>
    where
        F: FnOnce(&mut JobRecord) -> R,
    {
        let slot = self.hydrate(id).await?;
        let mut record = slot.record.lock().await;
        if record.job.status.is_terminal() {
            return Err(ProgressError::Terminal(id));
        }
        let out = f(&mut record);
        self.commit(&slot, &mut record).await;
        Ok(out)
    }

    /// Fails a running job with `reason`. Cancelling a finished job is a no-op.
    pub async fn cancel(&self, id: JobId, reason: &str) -> ProgressResult<CrawlJob> {
        let slot = self.hydrate(id).await?;
        let mut record = slot.record.lock().await;
        if !record.job.status.is_terminal() {
            record.job.cancel(reason);
            self.commit(&slot, &mut record).await;
            info!(job_id = %id, reason, "job cancelled");
        }
        Ok(record.job.clone())
    }

    /// Latest published snapshot.
    pub async fn current(&self, id: JobId) -> ProgressResult<CrawlJob> {
        let slot = self.hydrate(id).await?;
        let job = slot.snapshot.borrow().clone();
        Ok(job)
    }

    /// Full record including resume checkpoints.
    pub async fn record(&self, id: JobId) -> ProgressResult<JobRecord> {
        let slot = self.hydrate(id).await?;
        let record = slot.record.lock().await;
        Ok(record.clone())
    }

    pub async fn subscribe(&self, id: JobId) -> ProgressResult<watch::Receiver<CrawlJob>> {
        let slot = self.hydrate(id).await?;
        Ok(slot.snapshot.subscribe())
    }

    /// Resolves once the job reaches `completed` or `failed`.
    pub async fn wait(&self, id: JobId) -> ProgressResult<CrawlJob> {
        let mut rx = self.subscribe(id).await?;
        let job = rx
            .wait_for(|job| job.status.is_terminal())
            .await
            .map_err(|_| ProgressError::NotFound(id))?;
        Ok(job.clone())
    }

    pub async fn active_job(&self, scope: &str) -> Option<JobId> {
        self.active.lock().await.get(scope).copied()
    }

    async fn slot(&self, id: JobId) -> Option<Arc<JobSlot>> {
        self.jobs.read().await.get(&id).cloned()
    }

    /// The job's slot, loading it from the store when this process has not
    /// seen it. Finished jobs get a detached slot that is not kept.
    async fn hydrate(&self, id: JobId) -> ProgressResult<Arc<JobSlot>> {
        if let Some(slot) = self.slot(id).await {
            return Ok(slot);
        }
        let record = self.store.load_job(id).await?.ok_or(ProgressError::NotFound(id))?;
        if record.job.status.is_terminal() {
            return Ok(JobSlot::new(record));
        }
        debug!(job_id = %id, "job loaded from store");
        self.adopt(record).await;
        self.slot(id).await.ok_or(ProgressError::NotFound(id))
    }

    /// Keeps an existing slot for the same job untouched.
    async fn insert_slot(&self, record: JobRecord) -> Arc<JobSlot> {
        let id = record.id();
        self.jobs
            .write()
            .await
            .entry(id)
            .or_insert_with(|| JobSlot::new(record))
            .clone()
    }

    /// Most recently updated non-terminal job of `scope` in the store.
    async fn persisted_active(&self, scope: &str) -> ProgressResult<Option<JobRecord>> {
        let record = self
            .store
            .list_jobs()
            .await?
            .into_iter()
            .filter(|record| record.job.config.scope == scope && !record.job.status.is_terminal())
            .max_by_key(|record| record.job.last_updated_at);
        Ok(record)
    }

    async fn commit(&self, slot: &JobSlot, record: &mut JobRecord) {
        record.job.recompute_status();
        record.job.touch();
        let terminal = record.job.status.is_terminal();
        if terminal {
            record.checkpoints.clear();
        }
        // A failed checkpoint write does not stop the job; the next update
        // persists the whole record again.
        if let Err(e) = self.store.save_job(record).await {
            error!(job_id = %record.id(), error = %e, "failed to persist job state");
        }
        slot.snapshot.send_replace(record.job.clone());

        if terminal {
            let mut active = self.active.lock().await;
            if active.get(&record.job.config.scope) == Some(&record.id()) {
                active.remove(&record.job.config.scope);
            }
            self.jobs.write().await.remove(&record.id());
            info!(job_id = %record.id(), status = %record.job.status, "job finished");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lp_core::{LanguageStatus, PersistenceError};
    use lp_storage::MemoryStorage;

    fn config(scope: &str) -> (CrawlConfig, BTreeMap<Locale, u32>) {
        let locales: Vec<Locale> = vec!["zh".parse().unwrap(), "en".parse().unwrap()];
        let counts = locales.iter().map(|l| (l.clone(), 2)).collect();
        let mut config = CrawlConfig::new(locales, 2);
        config.scope = scope.to_string();
        (config, counts)
    }

    fn tracker() -> (ProgressTracker, Arc<MemoryStorage>) {
        let store = Arc::new(MemoryStorage::new());
        (ProgressTracker::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_one_active_job_per_scope() {
        let (tracker, _) = tracker();
        let (cfg, counts) = config("desk");
        let first = tracker.begin(cfg.clone(), &counts).await.unwrap();
        let second = tracker.begin(cfg, &counts).await.unwrap();
        assert!(matches!(first, Begin::Started(_)));
        assert_eq!(second, Begin::Existing(first.job_id()));

        let (other, counts) = config("other-desk");
        assert!(matches!(tracker.begin(other, &counts).await.unwrap(), Begin::Started(_)));
    }

    #[tokio::test]
    async fn test_scope_is_released_when_job_finishes() {
        let (tracker, _) = tracker();
        let (cfg, counts) = config("desk");
        let id = tracker.begin(cfg.clone(), &counts).await.unwrap().job_id();
        tracker.cancel(id, "cancelled by operator").await.unwrap();

        assert_eq!(tracker.active_job("desk").await, None);
        assert!(matches!(tracker.begin(cfg, &counts).await.unwrap(), Begin::Started(new) if new != id));
    }

    #[tokio::test]
    async fn test_updates_are_persisted_and_published() {
        let (tracker, store) = tracker();
        let (cfg, counts) = config("desk");
        let id = tracker.begin(cfg, &counts).await.unwrap().job_id();
        let zh: Locale = "zh".parse().unwrap();

        let before = tracker.current(id).await.unwrap().last_updated_at;
        tracker
            .update(id, |record| {
                let progress = record.job.languages.get_mut(&zh).unwrap();
                progress.advance(LanguageStatus::Crawling);
                progress.record_source(3, 2, false);
            })
            .await
            .unwrap();

        let snapshot = tracker.current(id).await.unwrap();
        assert_eq!(snapshot.languages[&zh].articles_found, 3);
        assert!(snapshot.last_updated_at >= before);

        let stored = store.load_job(id).await.unwrap().unwrap();
        assert_eq!(stored.job.languages[&zh].articles_processed, 2);
    }

    #[tokio::test]
    async fn test_terminal_jobs_reject_updates() {
        let (tracker, _) = tracker();
        let (cfg, counts) = config("desk");
        let id = tracker.begin(cfg, &counts).await.unwrap().job_id();
        let job = tracker.cancel(id, "stop").await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);

        let result = tracker.update(id, |record| record.job.completed_sources += 1).await;
        assert_eq!(result, Err(ProgressError::Terminal(id)));
        assert_eq!(tracker.cancel(id, "again").await.unwrap().error.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn test_concurrent_writers_do_not_lose_updates() {
        let (tracker, _) = tracker();
        let tracker = Arc::new(tracker);
        let (cfg, counts) = config("desk");
        let id = tracker.begin(cfg, &counts).await.unwrap().job_id();

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let tracker = tracker.clone();
                tokio::spawn(async move {
                    tracker
                        .update(id, |record| record.job.completed_sources += 1)
                        .await
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(tracker.current(id).await.unwrap().completed_sources, 50);
    }

    #[tokio::test]
    async fn test_restart_reloads_active_jobs() {
        let store = Arc::new(MemoryStorage::new());
        let (cfg, counts) = config("desk");
        let id = {
            let tracker = ProgressTracker::new(store.clone());
            tracker.begin(cfg.clone(), &counts).await.unwrap().job_id()
        };

        let tracker = ProgressTracker::new(store);
        assert_eq!(tracker.current(id).await.unwrap().status, JobStatus::Crawling);
        assert_eq!(tracker.load_active().await.unwrap(), vec![id]);
        assert_eq!(tracker.begin(cfg, &counts).await.unwrap(), Begin::Existing(id));
    }

    #[tokio::test]
    async fn test_begin_joins_job_persisted_by_another_tracker() {
        let store = Arc::new(MemoryStorage::new());
        let (cfg, counts) = config("desk");
        let first = ProgressTracker::new(store.clone()).begin(cfg.clone(), &counts).await.unwrap();

        let second = ProgressTracker::new(store.clone()).begin(cfg, &counts).await.unwrap();
        assert_eq!(second, Begin::Existing(first.job_id()));
        let active = store.list_jobs().await.unwrap();
        assert_eq!(active.iter().filter(|r| !r.job.status.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn test_job_control_after_restart() {
        let store = Arc::new(MemoryStorage::new());
        let (cfg, counts) = config("desk");
        let id = ProgressTracker::new(store.clone()).begin(cfg.clone(), &counts).await.unwrap().job_id();

        let tracker = ProgressTracker::new(store.clone());
        assert_eq!(tracker.record(id).await.unwrap().id(), id);
        let job = tracker.cancel(id, "cancelled by operator").await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(store.load_job(id).await.unwrap().unwrap().job.status, JobStatus::Failed);
        assert!(matches!(tracker.begin(cfg, &counts).await.unwrap(), Begin::Started(new) if new != id));
    }

    #[tokio::test]
    async fn test_finished_jobs_drop_checkpoints() {
        let (tracker, store) = tracker();
        let (cfg, counts) = config("desk");
        let id = tracker.begin(cfg, &counts).await.unwrap().job_id();
        let zh: Locale = "zh".parse().unwrap();
        tracker
            .update(id, |record| {
                let checkpoint = record.checkpoints.entry(zh.clone()).or_default();
                checkpoint.attempted_sources.insert("people".to_string());
            })
            .await
            .unwrap();
        assert!(!store.load_job(id).await.unwrap().unwrap().checkpoints.is_empty());

        tracker.cancel(id, "stop").await.unwrap();
        assert!(store.load_job(id).await.unwrap().unwrap().checkpoints.is_empty());
        assert!(!tracker.jobs.read().await.contains_key(&id));

        assert_eq!(tracker.current(id).await.unwrap().status, JobStatus::Failed);
        assert_eq!(tracker.wait(id).await.unwrap().status, JobStatus::Failed);
        assert!(!tracker.jobs.read().await.contains_key(&id));
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let (tracker, _) = tracker();
        let id = JobId::new();
        assert_eq!(tracker.current(id).await, Err(ProgressError::NotFound(id)));
        assert!(tracker.update(id, |_| ()).await.is_err());
    }

    #[tokio::test]
    async fn test_wait_resolves_on_terminal_status() {
        let (tracker, _) = tracker();
        let tracker = Arc::new(tracker);
        let (cfg, counts) = config("desk");
        let id = tracker.begin(cfg, &counts).await.unwrap().job_id();

        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.wait(id).await })
        };
        tracker
            .update(id, |record| {
                for progress in record.job.languages.values_mut() {
                    progress.advance(LanguageStatus::Completed);
                }
            })
            .await
            .unwrap();

        let job = waiter.await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    struct BrokenStore;

    #[async_trait::async_trait]
    impl JobStore for BrokenStore {
        async fn save_job(&self, _record: &JobRecord) -> Result<(), PersistenceError> {
            Err(PersistenceError::Backend("disk full".to_string()))
        }

        async fn load_job(&self, _id: JobId) -> Result<Option<JobRecord>, PersistenceError> {
            Ok(None)
        }

        async fn list_jobs(&self) -> Result<Vec<JobRecord>, PersistenceError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_begin_surfaces_store_failure() {
        let tracker = ProgressTracker::new(Arc::new(BrokenStore));
        let (cfg, counts) = config("desk");
        let result = tracker.begin(cfg, &counts).await;
        assert!(matches!(result, Err(ProgressError::Persistence(_))));
    }
}
