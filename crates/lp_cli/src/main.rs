use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use lp_core::{AiModel, CrawlConfig, CrawlJob, JobId, JobStatus, Locale, PipelineConfig, StorageKind};
use lp_crawler::cli::{handle_command, SourceArgs};
use lp_crawler::logging::init_logging;
use lp_crawler::{CrawlManager, SourceCatalog};
use lp_progress::JobReport;
use lp_web::AppState;
use tracing::{info, warn};

/// `1h30m`, `45m`, `90` (seconds).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HumanDuration(Duration);

impl FromStr for HumanDuration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut total = 0u64;
        let mut number = String::new();
        for c in s.chars().filter(|c| !c.is_whitespace()) {
            if c.is_ascii_digit() {
                number.push(c);
                continue;
            }
            let value: u64 = number.parse().map_err(|_| format!("missing number before '{c}'"))?;
            total += match c {
                's' => value,
                'm' => value * 60,
                'h' => value * 3600,
                'd' => value * 86400,
                _ => return Err(format!("invalid duration unit: {c}")),
            };
            number.clear();
        }
        if !number.is_empty() {
            total += number.parse::<u64>().map_err(|e| e.to_string())?;
        }
        if total == 0 {
            return Err("duration must be positive".to_string());
        }
        Ok(HumanDuration(Duration::from_secs(total)))
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Multi-language news crawler and translator", long_about = None)]
struct Cli {
    /// Pipeline config file (JSON)
    #[arg(long, env = "LINGOPRESS_CONFIG")]
    config: Option<PathBuf>,
    #[arg(long, env = "LINGOPRESS_STORAGE")]
    storage: Option<StorageKind>,
    #[arg(long, env = "LINGOPRESS_STATE_DIR")]
    state_dir: Option<PathBuf>,
    /// Source catalog (JSON); the built-in catalog is used otherwise
    #[arg(long, env = "LINGOPRESS_CATALOG")]
    catalog: Option<PathBuf>,
    /// OpenAI-compatible base URL overriding the provider default
    #[arg(long, env = "LINGOPRESS_MODEL_URL")]
    model_url: Option<String>,
    #[arg(long, env = "LINGOPRESS_MODEL_NAME")]
    model_name: Option<String>,
    #[arg(long, default_value = "info")]
    log_level: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Crawl, translate and store news for the given locales
    Crawl {
        /// Comma separated locales, e.g. zh,en,pt-PT
        #[arg(long, short, value_delimiter = ',', required = true)]
        languages: Vec<Locale>,
        /// Articles per locale
        #[arg(long, short = 'n', default_value_t = 10)]
        count: u32,
        #[arg(long, default_value = "deepseek", help = "AI provider: deepseek, openai, ollama, dummy, disabled")]
        model: AiModel,
        /// Keep only articles published today
        #[arg(long)]
        today: bool,
        #[arg(long)]
        scope: Option<String>,
        /// Print the job id and exit without waiting
        #[arg(long)]
        detach: bool,
        /// Run again after every interval (e.g. 1h, 30m, 1h15m)
        #[arg(long)]
        every: Option<HumanDuration>,
    },
    /// Continue every unfinished job in the state store
    Resume,
    /// Show a job snapshot
    Progress {
        id: JobId,
        #[arg(long)]
        json: bool,
    },
    /// Inspect the source catalog
    Sources(SourceArgs),
    /// Serve the HTTP API
    Serve {
        #[arg(long, default_value = "127.0.0.1:8080", env = "LINGOPRESS_ADDR")]
        addr: SocketAddr,
        /// Do not pick up unfinished jobs on start
        #[arg(long)]
        no_resume: bool,
    },
}

fn pipeline_config(cli: &Cli) -> anyhow::Result<PipelineConfig> {
    let mut config = PipelineConfig::load(cli.config.as_deref()).context("loading pipeline config")?;
    if let Some(storage) = cli.storage {
        config.storage = storage;
    }
    if let Some(dir) = &cli.state_dir {
        config.state_dir = dir.clone();
    }
    if let Some(catalog) = &cli.catalog {
        config.catalog_path = Some(catalog.clone());
    }
    if let Some(url) = &cli.model_url {
        config.model_base_url = Some(url.clone());
    }
    if let Some(name) = &cli.model_name {
        config.model_name = Some(name.clone());
    }
    config.validate()?;
    Ok(config)
}

fn load_catalog(config: &PipelineConfig) -> anyhow::Result<SourceCatalog> {
    match &config.catalog_path {
        Some(path) => SourceCatalog::from_json_file(path).with_context(|| format!("loading catalog {}", path.display())),
        None => Ok(SourceCatalog::builtin()),
    }
}

async fn build_manager(config: &PipelineConfig) -> anyhow::Result<CrawlManager> {
    let catalog = load_catalog(config)?;
    let storage = lp_storage::create_storage(config.storage, &config.state_dir).await?;
    info!("💾 Storage ready ({:?} in {})", config.storage, config.state_dir.display());
    info!("🦗 {} sources in catalog", catalog.len());
    Ok(CrawlManager::from_config(config, catalog, storage))
}

/// Logs a summary line on every change until the job's workers stop.
async fn follow(manager: &CrawlManager, id: JobId) -> anyhow::Result<CrawlJob> {
    let mut rx = manager.tracker().subscribe(id).await?;
    let printer = tokio::spawn(async move {
        let mut last = String::new();
        while rx.changed().await.is_ok() {
            let line = JobReport::new(&rx.borrow_and_update()).summary_line();
            if line != last {
                info!("{}", line);
                last = line;
            }
        }
    });
    let job = manager.wait(id).await;
    printer.abort();
    Ok(job?)
}

fn finish(job: &CrawlJob) -> anyhow::Result<()> {
    println!("{}", JobReport::new(job));
    match job.status {
        JobStatus::Failed => bail!("job {} failed: {}", job.id, job.error.as_deref().unwrap_or("unknown error")),
        JobStatus::Completed => Ok(()),
        _ => {
            warn!("job {} stopped with unsaved articles; run `lp resume` to retry", job.id);
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);
    let config = pipeline_config(&cli)?;

    match cli.command {
        Commands::Crawl {
            languages,
            count,
            model,
            today,
            scope,
            detach,
            every,
        } => {
            let manager = build_manager(&config).await?;
            let mut request = CrawlConfig::new(languages, count);
            request.ai_model = model;
            request.date_filter = today;
            if let Some(scope) = scope {
                request.scope = scope;
            }
            loop {
                let id = manager.start_job(request.clone()).await?;
                println!("{id}");
                if detach {
                    if config.storage == StorageKind::Memory {
                        warn!("memory storage does not outlive this process; the job stops now");
                    }
                    return Ok(());
                }
                let job = follow(&manager, id).await?;
                let outcome = finish(&job);
                let Some(HumanDuration(interval)) = every else {
                    return outcome;
                };
                if let Err(e) = outcome {
                    warn!("{:#}", e);
                }
                info!("Next run in {}s", interval.as_secs());
                tokio::time::sleep(interval).await;
            }
        }
        Commands::Resume => {
            let manager = build_manager(&config).await?;
            let ids = manager.resume_active_jobs().await?;
            if ids.is_empty() {
                println!("Nothing to resume");
            }
            let jobs = futures::future::try_join_all(ids.iter().map(|id| follow(&manager, *id))).await?;
            for job in &jobs {
                println!("{}", JobReport::new(job));
            }
        }
        Commands::Progress { id, json } => {
            let manager = build_manager(&config).await?;
            let job = manager.get_progress(id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&job)?);
            } else {
                println!("{}", JobReport::new(&job));
            }
        }
        Commands::Sources(args) => {
            let catalog = load_catalog(&config)?;
            handle_command(args, &catalog).await?;
        }
        Commands::Serve { addr, no_resume } => {
            let manager = build_manager(&config).await?;
            if !no_resume {
                manager.resume_active_jobs().await?;
            }
            let state = AppState {
                service: Arc::new(manager),
            };
            lp_web::serve(addr, state).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_human_duration() {
        assert_eq!("90".parse::<HumanDuration>().unwrap().0, Duration::from_secs(90));
        assert_eq!("1h15m30s".parse::<HumanDuration>().unwrap().0, Duration::from_secs(4530));
        assert_eq!("2d".parse::<HumanDuration>().unwrap().0, Duration::from_secs(172_800));
        assert!("1x".parse::<HumanDuration>().is_err());
        assert!("h".parse::<HumanDuration>().is_err());
        assert!("0".parse::<HumanDuration>().is_err());
    }

    #[test]
    fn test_flags_override_config_file() {
        let cli = Cli::parse_from([
            "lp",
            "--storage",
            "file",
            "--state-dir",
            "/tmp/lp-state",
            "--model-name",
            "qwen2.5:14b",
            "crawl",
            "-l",
            "zh,en",
            "-n",
            "3",
            "--model",
            "ollama",
        ]);
        let config = pipeline_config(&cli).unwrap();
        assert_eq!(config.storage, StorageKind::File);
        assert_eq!(config.state_dir, PathBuf::from("/tmp/lp-state"));
        assert_eq!(config.model_name.as_deref(), Some("qwen2.5:14b"));
        match cli.command {
            Commands::Crawl { languages, count, model, .. } => {
                assert_eq!(languages.len(), 2);
                assert_eq!(languages[0].to_string(), "zh-CN");
                assert_eq!(count, 3);
                assert_eq!(model, AiModel::Ollama);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
