use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::JobControlError;
use crate::types::{AiModel, Language, Locale, PolishedArticle, RawArticle};

pub const DEFAULT_SCOPE: &str = "default";
pub const MAX_ARTICLES_PER_LANGUAGE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = JobControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| JobControlError::InvalidConfig(format!("invalid job id {s}: {e}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LanguageStatus {
    Pending,
    Crawling,
    Polishing,
    Completed,
    Failed,
}

impl LanguageStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, LanguageStatus::Completed | LanguageStatus::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            LanguageStatus::Pending => 0,
            LanguageStatus::Crawling => 1,
            LanguageStatus::Polishing => 2,
            LanguageStatus::Completed | LanguageStatus::Failed => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Idle,
    Crawling,
    Polishing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobStatus::Idle => "idle",
            JobStatus::Crawling => "crawling",
            JobStatus::Polishing => "polishing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        })
    }
}

/// Progress of one (language, country) crawl unit.
///
/// Counters only move forward and keep
/// `articles_polished <= articles_processed <= articles_found`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageProgress {
    pub status: LanguageStatus,
    pub articles_found: u32,
    pub articles_processed: u32,
    pub articles_polished: u32,
    pub current_source_name: Option<String>,
    pub error: Option<String>,
    #[serde(default)]
    pub sources_total: u32,
    #[serde(default)]
    pub sources_attempted: u32,
    #[serde(default)]
    pub sources_failed: u32,
    #[serde(default)]
    pub translation_failures: BTreeMap<Language, String>,
}

impl LanguageProgress {
    pub fn new(sources_total: u32) -> Self {
        Self {
            status: LanguageStatus::Pending,
            articles_found: 0,
            articles_processed: 0,
            articles_polished: 0,
            current_source_name: None,
            error: None,
            sources_total,
            sources_attempted: 0,
            sources_failed: 0,
            translation_failures: BTreeMap::new(),
        }
    }

    /// Moves the unit forward. Backward moves and moves out of a terminal
    /// state are ignored; returns whether the status changed.
    pub fn advance(&mut self, next: LanguageStatus) -> bool {
        if self.status.is_terminal() || (next.rank() <= self.status.rank() && next != LanguageStatus::Failed) {
            return false;
        }
        self.status = next;
        if next.is_terminal() {
            self.current_source_name = None;
        }
        true
    }

    /// Records the outcome of one source: `found` candidates yielded by it and
    /// `kept` candidates now held in the (possibly truncated) batch.
    pub fn record_source(&mut self, found: u32, kept: u32, failed: bool) {
        self.sources_attempted += 1;
        if failed {
            self.sources_failed += 1;
        }
        self.articles_found += found;
        self.articles_processed = self.articles_processed.max(kept).min(self.articles_found);
    }

    pub fn record_polished(&mut self) {
        if self.articles_polished < self.articles_processed {
            self.articles_polished += 1;
        }
    }

    pub fn counters_consistent(&self) -> bool {
        self.articles_polished <= self.articles_processed && self.articles_processed <= self.articles_found
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlConfig {
    pub target_languages: Vec<Locale>,
    pub articles_per_language: u32,
    #[serde(default)]
    pub ai_model: AiModel,
    #[serde(default)]
    pub date_filter: bool,
    #[serde(default = "default_scope")]
    pub scope: String,
}

fn default_scope() -> String {
    DEFAULT_SCOPE.to_string()
}

impl CrawlConfig {
    pub fn new(target_languages: Vec<Locale>, articles_per_language: u32) -> Self {
        Self {
            target_languages,
            articles_per_language,
            ai_model: AiModel::default(),
            date_filter: false,
            scope: default_scope(),
        }
    }

    pub fn validate(&self) -> Result<(), JobControlError> {
        if self.target_languages.is_empty() {
            return Err(JobControlError::InvalidConfig("no target languages".to_string()));
        }
        let unique: BTreeSet<&Locale> = self.target_languages.iter().collect();
        if unique.len() != self.target_languages.len() {
            return Err(JobControlError::InvalidConfig("duplicate target languages".to_string()));
        }
        if self.articles_per_language == 0 || self.articles_per_language > MAX_ARTICLES_PER_LANGUAGE {
            return Err(JobControlError::InvalidConfig(format!(
                "articles_per_language must be between 1 and {MAX_ARTICLES_PER_LANGUAGE}"
            )));
        }
        if self.scope.trim().is_empty() {
            return Err(JobControlError::InvalidConfig("empty scope".to_string()));
        }
        Ok(())
    }

    /// Languages every article is translated into, in request order.
    pub fn translation_targets(&self) -> Vec<Language> {
        let mut seen = BTreeSet::new();
        self.target_languages
            .iter()
            .map(|locale| locale.language)
            .filter(|language| seen.insert(*language))
            .collect()
    }
}

/// Snapshot-able job aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlJob {
    pub id: JobId,
    pub config: CrawlConfig,
    pub total_sources: u32,
    pub completed_sources: u32,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
    pub last_updated_at: DateTime<Utc>,
    pub languages: BTreeMap<Locale, LanguageProgress>,
}

impl CrawlJob {
    pub fn new(config: CrawlConfig, sources_per_locale: &BTreeMap<Locale, u32>) -> Self {
        let now = Utc::now();
        let languages = config
            .target_languages
            .iter()
            .map(|locale| {
                let total = sources_per_locale.get(locale).copied().unwrap_or(0);
                (locale.clone(), LanguageProgress::new(total))
            })
            .collect();
        Self {
            id: JobId::new(),
            total_sources: sources_per_locale.values().sum(),
            config,
            completed_sources: 0,
            status: JobStatus::Idle,
            started_at: now,
            duration_ms: None,
            error: None,
            last_updated_at: now,
            languages,
        }
    }

    /// Re-derives the job status from its units. Terminal jobs never change.
    pub fn recompute_status(&mut self) {
        if self.status.is_terminal() || self.status == JobStatus::Idle {
            return;
        }
        let statuses: Vec<LanguageStatus> = self.languages.values().map(|p| p.status).collect();
        let next = if statuses.iter().all(|s| s.is_terminal()) {
            if statuses.iter().all(|s| *s == LanguageStatus::Failed) {
                JobStatus::Failed
            } else {
                JobStatus::Completed
            }
        } else if statuses
            .iter()
            .all(|s| !matches!(s, LanguageStatus::Pending | LanguageStatus::Crawling))
        {
            JobStatus::Polishing
        } else {
            JobStatus::Crawling
        };

        if next == JobStatus::Failed {
            let reasons: Vec<String> = self
                .languages
                .iter()
                .map(|(locale, p)| format!("{locale}: {}", p.error.as_deref().unwrap_or("failed")))
                .collect();
            self.error = Some(format!("all target languages failed ({})", reasons.join("; ")));
        }
        self.status = next;
        if next.is_terminal() {
            self.stamp_duration();
        }
    }

    /// Operator cancellation: fails the job and every unfinished unit.
    pub fn cancel(&mut self, reason: &str) {
        if self.status.is_terminal() {
            return;
        }
        for progress in self.languages.values_mut() {
            if !progress.status.is_terminal() {
                progress.advance(LanguageStatus::Failed);
                progress.error.get_or_insert_with(|| reason.to_string());
            }
        }
        self.status = JobStatus::Failed;
        self.error = Some(reason.to_string());
        self.stamp_duration();
    }

    /// Bumps `last_updated_at`, never moving it backwards.
    pub fn touch(&mut self) {
        let now = Utc::now();
        if now > self.last_updated_at {
            self.last_updated_at = now;
        }
    }

    fn stamp_duration(&mut self) {
        let elapsed = Utc::now().signed_duration_since(self.started_at);
        self.duration_ms = Some(elapsed.num_milliseconds().max(0) as u64);
    }
}

/// Resume state for one crawl unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitCheckpoint {
    pub attempted_sources: BTreeSet<String>,
    pub batch: Vec<RawArticle>,
    pub pending_saves: Vec<PolishedArticle>,
}

/// What the job store persists: the public snapshot plus resume state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job: CrawlJob,
    pub checkpoints: BTreeMap<Locale, UnitCheckpoint>,
}

impl JobRecord {
    pub fn new(job: CrawlJob) -> Self {
        let checkpoints = job
            .languages
            .keys()
            .map(|locale| (locale.clone(), UnitCheckpoint::default()))
            .collect();
        Self { job, checkpoints }
    }

    pub fn id(&self) -> JobId {
        self.job.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(locales: &[&str]) -> CrawlJob {
        let locales: Vec<Locale> = locales.iter().map(|l| l.parse().unwrap()).collect();
        let counts = locales.iter().map(|l| (l.clone(), 2)).collect();
        let mut job = CrawlJob::new(CrawlConfig::new(locales, 2), &counts);
        job.status = JobStatus::Crawling;
        job
    }

    #[test]
    fn test_config_validation() {
        let zh: Locale = "zh".parse().unwrap();
        assert!(CrawlConfig::new(vec![zh.clone()], 2).validate().is_ok());
        assert!(CrawlConfig::new(vec![], 2).validate().is_err());
        assert!(CrawlConfig::new(vec![zh.clone()], 0).validate().is_err());
        assert!(CrawlConfig::new(vec![zh.clone(), zh], 2).validate().is_err());
    }

    #[test]
    fn test_translation_targets_dedup() {
        let config = CrawlConfig::new(
            vec!["en-US".parse().unwrap(), "zh".parse().unwrap(), "en-GB".parse().unwrap()],
            1,
        );
        assert_eq!(config.translation_targets(), vec![Language::En, Language::Zh]);
    }

    #[test]
    fn test_language_progress_only_moves_forward() {
        let mut progress = LanguageProgress::new(1);
        assert!(progress.advance(LanguageStatus::Crawling));
        assert!(progress.advance(LanguageStatus::Polishing));
        assert!(!progress.advance(LanguageStatus::Crawling));
        assert!(progress.advance(LanguageStatus::Completed));
        assert!(!progress.advance(LanguageStatus::Failed));
        assert_eq!(progress.status, LanguageStatus::Completed);
    }

    #[test]
    fn test_counters_stay_ordered() {
        let mut progress = LanguageProgress::new(2);
        progress.record_source(7, 5, false);
        progress.record_source(0, 5, true);
        for _ in 0..9 {
            progress.record_polished();
        }
        assert_eq!(progress.articles_found, 7);
        assert_eq!(progress.articles_processed, 5);
        assert_eq!(progress.articles_polished, 5);
        assert_eq!(progress.sources_failed, 1);
        assert!(progress.counters_consistent());
    }

    #[test]
    fn test_job_status_rules() {
        let mut job = job(&["zh", "en"]);
        let zh: Locale = "zh".parse().unwrap();
        let en: Locale = "en".parse().unwrap();

        job.languages.get_mut(&zh).unwrap().advance(LanguageStatus::Polishing);
        job.recompute_status();
        assert_eq!(job.status, JobStatus::Crawling);

        job.languages.get_mut(&en).unwrap().advance(LanguageStatus::Failed);
        job.recompute_status();
        assert_eq!(job.status, JobStatus::Polishing);

        job.languages.get_mut(&zh).unwrap().advance(LanguageStatus::Completed);
        job.recompute_status();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.error.is_none());
        assert!(job.duration_ms.is_some());
    }

    #[test]
    fn test_job_fails_only_when_every_language_fails() {
        let mut job = job(&["zh", "en"]);
        for progress in job.languages.values_mut() {
            progress.advance(LanguageStatus::Failed);
        }
        job.recompute_status();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.as_deref().unwrap().starts_with("all target languages failed"));
    }

    #[test]
    fn test_cancel_is_terminal() {
        let mut job = job(&["zh"]);
        job.cancel("cancelled by operator");
        assert_eq!(job.status, JobStatus::Failed);
        job.recompute_status();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("cancelled by operator"));
    }
}
