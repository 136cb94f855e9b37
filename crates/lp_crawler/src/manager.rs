use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::{self, join_all};
use futures::StreamExt;
use lp_core::{
    make_slug, AiModel, ArticleStorage, CompletionModel, CrawlConfig, CrawlJob, FetchError, JobControlError, JobId,
    JobRecord, JobStatus, Language, LanguageProgress, LanguageStatus, Locale, PipelineConfig, PolishedArticle,
    RawArticle, Result, Source, UnitCheckpoint,
};
use lp_inference::{ArticlePolish, PolishEngine, PolishSettings};
use lp_progress::{Begin, JobReport, ProgressError, ProgressTracker};
use lp_storage::Storage;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard, Semaphore};
use tracing::{error, info, warn};

use crate::catalog::{SourceCatalog, SourceFilter};
use crate::fetcher::{FetchOptions, Fetcher, HttpFetcher};
use crate::logging::Logger;

pub const CANCEL_REASON: &str = "cancelled by operator";
const SAVE_FAILED: &str = "save failed";

/// Builds the completion model for a job's `ai_model` selector.
pub type ModelFactory = Arc<dyn Fn(AiModel) -> Arc<dyn CompletionModel> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub max_concurrent_languages: usize,
    pub fetch_timeout: Duration,
    pub polish: PolishSettings,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            max_concurrent_languages: 3,
            fetch_timeout: Duration::from_secs(20),
            polish: PolishSettings::default(),
        }
    }
}

impl ManagerSettings {
    pub fn from_pipeline(config: &PipelineConfig) -> Self {
        Self {
            max_concurrent_languages: config.max_concurrent_languages,
            fetch_timeout: config.fetch_timeout(),
            polish: PolishSettings::from_pipeline(config),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelAck {
    pub job_id: JobId,
    pub status: JobStatus,
    /// Whether workers were still running and have been told to stop
    pub was_running: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryOutcome {
    pub saved: u32,
    pub pending: u32,
    pub job: CrawlJob,
}

/// Job control surface consumed by the HTTP layer and the CLI.
#[async_trait]
pub trait CrawlService: Send + Sync {
    /// Starts a job, or returns the id of the job already active in its scope.
    async fn start_job(&self, config: CrawlConfig) -> Result<JobId>;

    async fn get_progress(&self, id: JobId) -> Result<CrawlJob>;

    async fn cancel_job(&self, id: JobId) -> Result<CancelAck>;

    async fn retry_saves(&self, id: JobId) -> Result<RetryOutcome>;

    async fn wait(&self, id: JobId) -> Result<CrawlJob>;

    async fn list_sources(&self, filter: &SourceFilter) -> Vec<Source>;
}

struct RunningJob {
    cancel: watch::Sender<bool>,
    done: watch::Receiver<bool>,
}

struct Inner {
    catalog: RwLock<SourceCatalog>,
    fetcher: Arc<dyn Fetcher>,
    tracker: Arc<ProgressTracker>,
    articles: Arc<dyn ArticleStorage>,
    models: ModelFactory,
    engines: Mutex<HashMap<AiModel, Arc<PolishEngine>>>,
    settings: ManagerSettings,
    running: Mutex<HashMap<JobId, RunningJob>>,
}

impl Inner {
    /// One engine per provider, shared by every job, so provider calls stay serialized.
    async fn engine_for(&self, model: AiModel) -> Arc<PolishEngine> {
        let mut engines = self.engines.lock().await;
        engines
            .entry(model)
            .or_insert_with(|| Arc::new(PolishEngine::new((self.models)(model), self.settings.polish.clone())))
            .clone()
    }
}

/// Runs crawl jobs: one task per locale, bounded by a semaphore.
#[derive(Clone)]
pub struct CrawlManager {
    inner: Arc<Inner>,
}

impl CrawlManager {
    pub fn new(
        catalog: SourceCatalog,
        fetcher: Arc<dyn Fetcher>,
        storage: Storage,
        models: ModelFactory,
        settings: ManagerSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                catalog: RwLock::new(catalog),
                fetcher,
                tracker: Arc::new(ProgressTracker::new(storage.jobs)),
                articles: storage.articles,
                models,
                engines: Mutex::new(HashMap::new()),
                settings,
                running: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// HTTP fetcher and configured AI providers.
    pub fn from_config(config: &PipelineConfig, catalog: SourceCatalog, storage: Storage) -> Self {
        let provider = lp_inference::Config::from_pipeline(config);
        let models: ModelFactory = Arc::new(move |model| lp_inference::create_model(model, &provider));
        Self::new(
            catalog,
            Arc::new(HttpFetcher::new(config.rate_limit_backoff())),
            storage,
            models,
            ManagerSettings::from_pipeline(config),
        )
    }

    pub fn tracker(&self) -> &Arc<ProgressTracker> {
        &self.inner.tracker
    }

    pub async fn catalog(&self) -> RwLockReadGuard<'_, SourceCatalog> {
        self.inner.catalog.read().await
    }

    pub async fn catalog_mut(&self) -> RwLockWriteGuard<'_, SourceCatalog> {
        self.inner.catalog.write().await
    }

    pub async fn start_job(&self, config: CrawlConfig) -> Result<JobId> {
        config.validate()?;
        let counts: BTreeMap<Locale, u32> = {
            let catalog = self.inner.catalog.read().await;
            config
                .target_languages
                .iter()
                .map(|locale| (locale.clone(), catalog.list(&SourceFilter::for_locale(locale)).len() as u32))
                .collect()
        };

        match self.inner.tracker.begin(config, &counts).await? {
            Begin::Existing(id) => {
                info!(job_id = %id, "start request joined the active job");
                // A job left by an earlier process has no workers here yet.
                self.spawn(id).await;
                Ok(id)
            }
            Begin::Started(id) => {
                self.spawn(id).await;
                Ok(id)
            }
        }
    }

    pub async fn get_progress(&self, id: JobId) -> Result<CrawlJob> {
        Ok(self.inner.tracker.current(id).await?)
    }

    pub async fn cancel_job(&self, id: JobId) -> Result<CancelAck> {
        let job = self.inner.tracker.cancel(id, CANCEL_REASON).await?;
        let was_running = match self.inner.running.lock().await.get(&id) {
            Some(run) => {
                run.cancel.send_replace(true);
                true
            }
            None => false,
        };
        Ok(CancelAck {
            job_id: id,
            status: job.status,
            was_running,
        })
    }

    /// Saves the articles a failed save left behind, without crawling or
    /// translating again, and completes the locales that have nothing left.
    pub async fn retry_saves(&self, id: JobId) -> Result<RetryOutcome> {
        if self.inner.running.lock().await.contains_key(&id) {
            return Err(JobControlError::AlreadyActive(id).into());
        }
        let record = self.inner.tracker.record(id).await?;
        if record.job.status.is_terminal() {
            return Ok(RetryOutcome {
                saved: 0,
                pending: 0,
                job: record.job,
            });
        }

        let (_keep, cancel) = watch::channel(false);
        let run = JobRun::new(self.inner.clone(), &record, cancel).await;
        let (mut saved, mut pending) = (0, 0);
        for (locale, progress) in &record.job.languages {
            if progress.status != LanguageStatus::Polishing {
                continue;
            }
            let unit = run.unit(locale.clone());
            let (ok, left) = unit.flush_pending().await?;
            saved += ok;
            pending += left;
            unit.finish_if_saved().await?;
        }
        info!(job_id = %id, saved, pending, "retried pending saves");
        Ok(RetryOutcome {
            saved,
            pending,
            job: self.inner.tracker.current(id).await?,
        })
    }

    /// Reloads every unfinished job from the job store and runs it again.
    pub async fn resume_active_jobs(&self) -> Result<Vec<JobId>> {
        let ids = self.inner.tracker.load_active().await?;
        for id in &ids {
            self.spawn(*id).await;
        }
        if !ids.is_empty() {
            info!("Resumed {} unfinished jobs", ids.len());
        }
        Ok(ids)
    }

    /// Resolves when the job's workers have stopped.
    pub async fn wait(&self, id: JobId) -> Result<CrawlJob> {
        let done = self.inner.running.lock().await.get(&id).map(|run| run.done.clone());
        if let Some(mut done) = done {
            let _ = done.wait_for(|finished| *finished).await;
        }
        self.get_progress(id).await
    }

    pub async fn list_sources(&self, filter: &SourceFilter) -> Vec<Source> {
        self.inner.catalog.read().await.list(filter)
    }

    async fn spawn(&self, id: JobId) {
        let mut running = self.inner.running.lock().await;
        if running.contains_key(&id) {
            return;
        }
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(false);
        running.insert(
            id,
            RunningJob {
                cancel: cancel_tx,
                done: done_rx,
            },
        );
        drop(running);

        let inner = self.inner.clone();
        tokio::spawn(async move {
            run_job(inner.clone(), id, cancel_rx).await;
            inner.running.lock().await.remove(&id);
            done_tx.send_replace(true);
        });
    }
}

#[async_trait]
impl CrawlService for CrawlManager {
    async fn start_job(&self, config: CrawlConfig) -> Result<JobId> {
        CrawlManager::start_job(self, config).await
    }

    async fn get_progress(&self, id: JobId) -> Result<CrawlJob> {
        CrawlManager::get_progress(self, id).await
    }

    async fn cancel_job(&self, id: JobId) -> Result<CancelAck> {
        CrawlManager::cancel_job(self, id).await
    }

    async fn retry_saves(&self, id: JobId) -> Result<RetryOutcome> {
        CrawlManager::retry_saves(self, id).await
    }

    async fn wait(&self, id: JobId) -> Result<CrawlJob> {
        CrawlManager::wait(self, id).await
    }

    async fn list_sources(&self, filter: &SourceFilter) -> Vec<Source> {
        CrawlManager::list_sources(self, filter).await
    }
}

async fn run_job(inner: Arc<Inner>, id: JobId, cancel: watch::Receiver<bool>) {
    let record = match inner.tracker.record(id).await {
        Ok(record) => record,
        Err(e) => {
            error!(job_id = %id, "cannot run job: {}", e);
            return;
        }
    };
    let run = JobRun::new(inner.clone(), &record, cancel).await;
    let semaphore = Arc::new(Semaphore::new(inner.settings.max_concurrent_languages.max(1)));
    info!(job_id = %id, locales = record.job.languages.len(), model = run.engine.model_name(), "job running");

    let handles: Vec<_> = record
        .job
        .languages
        .iter()
        .filter(|(_, progress)| !progress.status.is_terminal())
        .map(|(locale, _)| {
            let unit = run.unit(locale.clone());
            let semaphore = semaphore.clone();
            tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                if unit.cancelled() {
                    return;
                }
                match unit.run().await {
                    Ok(()) => {}
                    Err(ProgressError::Terminal(_)) => unit.logger.debug("job finished while the unit was running"),
                    Err(e) => unit.logger.error(&format!("unit stopped: {e}")),
                }
            })
        })
        .collect();

    for result in join_all(handles).await {
        if let Err(e) = result {
            error!(job_id = %id, "locale worker panicked: {}", e);
        }
    }

    match inner.tracker.current(id).await {
        Ok(job) => info!(job_id = %id, "{}", JobReport::new(&job).summary_line()),
        Err(e) => warn!(job_id = %id, "job vanished: {}", e),
    }
}

/// Shared state of one job execution.
#[derive(Clone)]
struct JobRun {
    inner: Arc<Inner>,
    id: JobId,
    config: Arc<CrawlConfig>,
    engine: Arc<PolishEngine>,
    targets: Arc<[Language]>,
    cancel: watch::Receiver<bool>,
    logger: Logger,
}

impl JobRun {
    async fn new(inner: Arc<Inner>, record: &JobRecord, cancel: watch::Receiver<bool>) -> Self {
        let config = record.job.config.clone();
        let engine = inner.engine_for(config.ai_model).await;
        let short: String = record.id().to_string().chars().take(8).collect();
        Self {
            inner,
            id: record.id(),
            targets: config.translation_targets().into(),
            config: Arc::new(config),
            engine,
            cancel,
            logger: Logger::new().with_prefix(short),
        }
    }

    fn unit(&self, locale: Locale) -> UnitRun {
        UnitRun {
            logger: self.logger.clone().with_prefix(locale.to_string()),
            run: self.clone(),
            locale,
        }
    }
}

/// The parts of a job record one locale worker may touch.
struct UnitState<'a> {
    progress: &'a mut LanguageProgress,
    checkpoint: &'a mut UnitCheckpoint,
    completed_sources: &'a mut u32,
}

struct UnitRun {
    run: JobRun,
    locale: Locale,
    logger: Logger,
}

impl UnitRun {
    fn cancelled(&self) -> bool {
        *self.run.cancel.borrow()
    }

    async fn update<R, F>(&self, f: F) -> std::result::Result<R, ProgressError>
    where
        F: FnOnce(&mut UnitState<'_>) -> R + Send,
        R: Send,
    {
        let locale = self.locale.clone();
        self.run
            .inner
            .tracker
            .update(self.run.id, move |record| {
                let JobRecord { job, checkpoints } = record;
                let checkpoint = checkpoints.entry(locale.clone()).or_default();
                let progress = job.languages.entry(locale).or_insert_with(|| LanguageProgress::new(0));
                f(&mut UnitState {
                    progress,
                    checkpoint,
                    completed_sources: &mut job.completed_sources,
                })
            })
            .await
    }

    async fn snapshot(&self) -> std::result::Result<(LanguageProgress, UnitCheckpoint), ProgressError> {
        let record = self.run.inner.tracker.record(self.run.id).await?;
        let progress = record
            .job
            .languages
            .get(&self.locale)
            .cloned()
            .unwrap_or_else(|| LanguageProgress::new(0));
        let checkpoint = record.checkpoints.get(&self.locale).cloned().unwrap_or_default();
        Ok((progress, checkpoint))
    }

    async fn run(&self) -> std::result::Result<(), ProgressError> {
        let (progress, _) = self.snapshot().await?;
        if matches!(progress.status, LanguageStatus::Pending | LanguageStatus::Crawling) && !self.crawl().await? {
            return Ok(());
        }
        let (progress, _) = self.snapshot().await?;
        if progress.status == LanguageStatus::Polishing {
            self.polish().await?;
        }
        Ok(())
    }

    /// Returns whether the unit moved on to polishing.
    async fn crawl(&self) -> std::result::Result<bool, ProgressError> {
        self.update(|u| u.progress.advance(LanguageStatus::Crawling)).await?;

        let sources = self.run.inner.catalog.read().await.list(&SourceFilter::for_locale(&self.locale));
        if sources.is_empty() {
            self.logger.warn("no active sources");
            let reason = format!("no active sources for {}", self.locale);
            self.update(move |u| {
                u.progress.error = Some(reason);
                u.progress.advance(LanguageStatus::Failed);
            })
            .await?;
            return Ok(false);
        }

        let quota = self.run.config.articles_per_language as usize;
        let options = FetchOptions {
            date_filter: self.run.config.date_filter,
            timeout: self.run.inner.settings.fetch_timeout,
        };
        let (_, checkpoint) = self.snapshot().await?;
        let mut held = checkpoint.batch.len();

        for source in &sources {
            if held >= quota {
                break;
            }
            if self.cancelled() {
                return Ok(false);
            }
            if checkpoint.attempted_sources.contains(&source.id) {
                self.logger.debug(&format!("{} already attempted, skipping", source.id));
                continue;
            }

            let name = source.name.clone();
            self.update(move |u| u.progress.current_source_name = Some(name)).await?;

            let source_id = source.id.clone();
            match self.collect(source, &options).await {
                Ok(articles) => {
                    let found = articles.len() as u32;
                    held = self
                        .update(move |u| {
                            u.checkpoint.attempted_sources.insert(source_id);
                            for article in articles {
                                if !u.checkpoint.batch.iter().any(|b| b.url == article.url) {
                                    u.checkpoint.batch.push(article);
                                }
                            }
                            u.checkpoint.batch.truncate(quota);
                            let kept = u.checkpoint.batch.len();
                            u.progress.record_source(found, kept as u32, false);
                            *u.completed_sources += 1;
                            kept
                        })
                        .await?;
                    self.logger
                        .info(&format!("{} yielded {} articles, {}/{} held", source.name, found, held, quota));
                    if let Err(e) = self.run.inner.catalog.write().await.record_crawled(&source.id, Utc::now()) {
                        self.logger.debug(&format!("could not stamp {}: {e}", source.id));
                    }
                }
                Err(e) => {
                    self.logger.warn(&format!("{} failed: {e}", source.name));
                    let message = format!("{}: {e}", source.name);
                    self.update(move |u| {
                        u.checkpoint.attempted_sources.insert(source_id);
                        let kept = u.checkpoint.batch.len() as u32;
                        u.progress.record_source(0, kept, true);
                        u.progress.error = Some(message);
                        *u.completed_sources += 1;
                    })
                    .await?;
                }
            }
        }

        let failed = self
            .update(|u| {
                let all_failed = u.progress.sources_attempted > 0
                    && u.progress.sources_failed == u.progress.sources_attempted
                    && u.checkpoint.batch.is_empty();
                if all_failed {
                    let last = u.progress.error.take().unwrap_or_default();
                    u.progress.error = Some(format!("all {} sources failed; last: {last}", u.progress.sources_failed));
                    u.progress.advance(LanguageStatus::Failed);
                } else {
                    u.progress.advance(LanguageStatus::Polishing);
                }
                all_failed
            })
            .await?;
        if failed {
            self.logger.warn("every source failed");
        }
        Ok(!failed)
    }

    /// Fetches one source within the fetch timeout and applies the date filter.
    async fn collect(&self, source: &Source, options: &FetchOptions) -> std::result::Result<Vec<RawArticle>, FetchError> {
        let fetch = async {
            let stream = self.run.inner.fetcher.fetch(source, options).await?;
            let articles: Vec<RawArticle> = stream.filter(|a| future::ready(options.accepts(a))).collect().await;
            Ok::<_, FetchError>(articles)
        };
        match tokio::time::timeout(options.timeout, fetch).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(options.timeout.as_secs())),
        }
    }

    async fn polish(&self) -> std::result::Result<(), ProgressError> {
        self.flush_pending().await?;
        let (progress, checkpoint) = self.snapshot().await?;
        let done = progress.articles_polished as usize + checkpoint.pending_saves.len();

        let sources: HashMap<String, Source> = {
            let catalog = self.run.inner.catalog.read().await;
            checkpoint
                .batch
                .iter()
                .filter_map(|a| catalog.get(&a.source_id).ok().map(|s| (s.id.clone(), s.clone())))
                .collect()
        };
        let ai_model = if self.run.engine.is_available() {
            self.run.config.ai_model
        } else {
            AiModel::Disabled
        };

        for article in checkpoint.batch.iter().skip(done) {
            if self.cancelled() {
                return Ok(());
            }
            let Some(polish) = self.run.engine.polish_article(article, &self.run.targets).await else {
                self.logger.warn(&format!("nothing to polish in {}", article.url));
                continue;
            };
            let failures: BTreeMap<Language, String> =
                polish.failures.iter().map(|(lang, e)| (*lang, e.to_string())).collect();
            if let Some(summary) = polish.failure_summary() {
                self.logger.warn(&format!("translation gaps for {}: {summary}", article.url));
            }
            let polished = assemble(article, polish, sources.get(&article.source_id), ai_model);

            match self.run.inner.articles.save(&polished).await {
                Ok(()) => {
                    self.update(move |u| {
                        u.progress.translation_failures.extend(failures);
                        u.progress.record_polished();
                    })
                    .await?;
                }
                Err(e) => {
                    self.logger.error(&format!("saving {} failed: {e}", polished.slug));
                    let message = format!("{SAVE_FAILED}: {e}");
                    self.update(move |u| {
                        u.progress.translation_failures.extend(failures);
                        u.checkpoint.pending_saves.push(polished);
                        u.progress.error = Some(message);
                    })
                    .await?;
                }
            }
        }

        self.finish_if_saved().await
    }

    /// Re-attempts saves left in the checkpoint. Returns (saved, still pending).
    async fn flush_pending(&self) -> std::result::Result<(u32, u32), ProgressError> {
        let (_, checkpoint) = self.snapshot().await?;
        let (mut saved, mut pending) = (0, 0);
        for article in checkpoint.pending_saves {
            match self.run.inner.articles.save(&article).await {
                Ok(()) => {
                    saved += 1;
                    let slug = article.slug;
                    self.update(move |u| {
                        u.checkpoint.pending_saves.retain(|p| p.slug != slug);
                        u.progress.record_polished();
                        let save_error = u.progress.error.as_deref().is_some_and(|e| e.starts_with(SAVE_FAILED));
                        if u.checkpoint.pending_saves.is_empty() && save_error {
                            u.progress.error = None;
                        }
                    })
                    .await?;
                }
                Err(e) => {
                    pending += 1;
                    self.logger.warn(&format!("retrying save of {} failed: {e}", article.slug));
                }
            }
        }
        Ok((saved, pending))
    }

    /// Completes the unit once nothing is waiting to be saved.
    async fn finish_if_saved(&self) -> std::result::Result<(), ProgressError> {
        let completed = self
            .update(|u| {
                let saved_all = u.checkpoint.pending_saves.is_empty()
                    && u.progress.articles_polished as usize >= u.checkpoint.batch.len();
                saved_all && u.progress.advance(LanguageStatus::Completed)
            })
            .await?;
        if completed {
            self.logger.info("completed");
        }
        Ok(())
    }
}

fn assemble(article: &RawArticle, polish: ArticlePolish, source: Option<&Source>, ai_model: AiModel) -> PolishedArticle {
    PolishedArticle {
        slug: make_slug(&article.title, &article.url),
        title: polish.title,
        content: polish.content,
        summary: polish.summary,
        category: source.map(|s| s.category.clone()).unwrap_or_default(),
        source_id: article.source_id.clone(),
        source_name: source.map_or_else(|| article.source_id.clone(), |s| s.name.clone()),
        source_url: article.url.clone(),
        original_language: article.language,
        published_at: article.published_at,
        ai_model,
        processed_at: Utc::now(),
    }
}
