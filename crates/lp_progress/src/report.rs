use std::fmt;
use std::time::Duration;

use lp_core::{CrawlJob, LanguageStatus};

/// Human readable view of a job snapshot.
#[derive(Debug, Clone)]
pub struct JobReport<'a> {
    job: &'a CrawlJob,
}

impl<'a> JobReport<'a> {
    pub fn new(job: &'a CrawlJob) -> Self {
        Self { job }
    }

    /// Share of requested articles that are polished, 0.0..=1.0.
    pub fn progress_fraction(&self) -> f64 {
        let quota = self.job.config.articles_per_language as f64 * self.job.languages.len() as f64;
        if quota == 0.0 {
            return 0.0;
        }
        let polished: u32 = self.job.languages.values().map(|p| p.articles_polished).sum();
        (polished as f64 / quota).min(1.0)
    }

    /// One line suitable for a polling loop.
    pub fn summary_line(&self) -> String {
        let finished = self
            .job
            .languages
            .values()
            .filter(|p| p.status.is_terminal())
            .count();
        format!(
            "{} - {:.1}% polished - {}/{} languages finished - {}/{} sources",
            self.job.status,
            self.progress_fraction() * 100.0,
            finished,
            self.job.languages.len(),
            self.job.completed_sources,
            self.job.total_sources,
        )
    }
}

fn status_label(status: LanguageStatus) -> &'static str {
    match status {
        LanguageStatus::Pending => "pending",
        LanguageStatus::Crawling => "crawling",
        LanguageStatus::Polishing => "polishing",
        LanguageStatus::Completed => "completed",
        LanguageStatus::Failed => "failed",
    }
}

impl fmt::Display for JobReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Job {}:", self.job.id)?;
        writeln!(f, "  Status: {}", self.job.status)?;
        writeln!(f, "  Progress: {}", self.summary_line())?;
        if let Some(ms) = self.job.duration_ms {
            writeln!(f, "  Duration: {:?}", Duration::from_millis(ms))?;
        }
        if let Some(error) = &self.job.error {
            writeln!(f, "  Error: {error}")?;
        }
        for (locale, progress) in &self.job.languages {
            write!(
                f,
                "  {locale}: {} found={} processed={} polished={}",
                status_label(progress.status),
                progress.articles_found,
                progress.articles_processed,
                progress.articles_polished,
            )?;
            if let Some(source) = &progress.current_source_name {
                write!(f, " (at {source})")?;
            }
            if let Some(error) = &progress.error {
                write!(f, " error: {error}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
