use clap::{Args, Subcommand};
use futures::StreamExt;
use lp_core::{Country, Language, RawArticle, Result, Source};

use crate::catalog::{SourceCatalog, SourceFilter};
use crate::fetcher::{FetchOptions, Fetcher, HttpFetcher};

#[derive(Args, Debug)]
pub struct SourceArgs {
    #[command(subcommand)]
    pub command: SourceCommands,
}

#[derive(Subcommand, Debug)]
pub enum SourceCommands {
    /// List catalog sources, best first
    List {
        /// Only sources in this language (e.g. zh, en)
        #[arg(long)]
        language: Option<Language>,
        /// Only sources for this country (e.g. CN, US)
        #[arg(long)]
        country: Option<Country>,
        /// Include inactive sources
        #[arg(long)]
        all: bool,
    },
    /// Show one source
    Show { id: String },
    /// Fetch one source now and print what it yields
    Fetch {
        id: String,
        /// Keep only articles published today
        #[arg(long)]
        today: bool,
    },
}

pub async fn handle_command(args: SourceArgs, catalog: &SourceCatalog) -> Result<()> {
    match args.command {
        SourceCommands::List { language, country, all } => {
            let filter = SourceFilter {
                language,
                country,
                active: if all { None } else { Some(true) },
            };
            let sources = catalog.list(&filter);
            println!("{} sources", sources.len());
            if let (Some(language), None) = (filter.language, &filter.country) {
                println!("{}", coverage_line(catalog, language));
            }
            for source in &sources {
                println!("{}", source_line(source));
            }
        }
        SourceCommands::Show { id } => {
            let source = catalog.get(&id)?;
            println!("{}", serde_json::to_string_pretty(source)?);
        }
        SourceCommands::Fetch { id, today } => {
            let source = catalog.get(&id)?;
            let options = FetchOptions {
                date_filter: today,
                ..FetchOptions::default()
            };
            let articles: Vec<RawArticle> = HttpFetcher::default()
                .fetch(source, &options)
                .await?
                .filter(|a| futures::future::ready(options.accepts(a)))
                .collect()
                .await;
            println!("Found {} articles", articles.len());
            for article in &articles {
                println!("{}", article_line(article));
            }
        }
    }
    Ok(())
}

fn source_line(source: &Source) -> String {
    format!(
        "{:<16} {:<6} p{:<2} q{:.2} {}{} - {}",
        source.id,
        source.locale(),
        source.priority,
        source.quality_score,
        source.name,
        if source.active { "" } else { " (inactive)" },
        source.endpoint
    )
}

fn coverage_line(catalog: &SourceCatalog, language: Language) -> String {
    let countries: Vec<String> = catalog.locales_for(language).iter().map(ToString::to_string).collect();
    if countries.is_empty() {
        format!("No active {} sources", language.english_name())
    } else {
        format!("{} covered in: {}", language.english_name(), countries.join(", "))
    }
}

fn article_line(article: &RawArticle) -> String {
    format!("{} {} - {}", article.published_at.format("%Y-%m-%d %H:%M"), article.title, article.url)
}
