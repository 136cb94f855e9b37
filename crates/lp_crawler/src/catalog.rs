use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use lp_core::{Country, Error, JobControlError, Language, Locale, Result, Source, SourceKind};
use serde::Deserialize;
use url::Url;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceFilter {
    pub language: Option<Language>,
    pub country: Option<Country>,
    pub active: Option<bool>,
}

impl SourceFilter {
    /// Active sources of exactly this language and country.
    pub fn for_locale(locale: &Locale) -> Self {
        Self {
            language: Some(locale.language),
            country: Some(locale.country.clone()),
            active: Some(true),
        }
    }

    pub fn matches(&self, source: &Source) -> bool {
        self.language.map_or(true, |l| source.language == l)
            && self.country.as_ref().map_or(true, |c| &source.country == c)
            && self.active.map_or(true, |a| source.active == a)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogFile {
    List(Vec<Source>),
    Wrapped { sources: Vec<Source> },
}

/// The set of configured sources, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct SourceCatalog {
    sources: BTreeMap<String, Source>,
}

fn validate(source: &Source) -> std::result::Result<(), JobControlError> {
    let invalid = |msg: String| Err(JobControlError::InvalidConfig(format!("source {}: {msg}", source.id)));
    if source.id.trim().is_empty() {
        return Err(JobControlError::InvalidConfig("source with empty id".to_string()));
    }
    if source.name.trim().is_empty() {
        return invalid("empty name".to_string());
    }
    if !(1..=10).contains(&source.priority) {
        return invalid(format!("priority {} outside 1..=10", source.priority));
    }
    if !(0.0..=1.0).contains(&source.quality_score) {
        return invalid(format!("quality score {} outside 0..=1", source.quality_score));
    }
    if let Err(e) = Url::parse(&source.endpoint) {
        return invalid(format!("invalid endpoint {}: {e}", source.endpoint));
    }
    Ok(())
}

impl SourceCatalog {
    pub fn from_sources(sources: Vec<Source>) -> std::result::Result<Self, JobControlError> {
        let mut map = BTreeMap::new();
        for source in sources {
            validate(&source)?;
            if map.contains_key(&source.id) {
                return Err(JobControlError::InvalidConfig(format!("duplicate source id {}", source.id)));
            }
            map.insert(source.id.clone(), source);
        }
        Ok(Self { sources: map })
    }

    /// Reads either a JSON array of sources or `{"sources": [...]}`.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let sources = match serde_json::from_str::<CatalogFile>(&content)? {
            CatalogFile::List(sources) | CatalogFile::Wrapped { sources } => sources,
        };
        let catalog = Self::from_sources(sources)?;
        tracing::info!("Loaded {} sources from {}", catalog.len(), path.display());
        Ok(catalog)
    }

    /// One or two well-known feeds per supported language.
    pub fn builtin() -> Self {
        const FEEDS: &[(&str, &str, &str, Language, &str, &str, u8, f32)] = &[
            ("chinanews", "China News", "https://www.chinanews.com.cn/rss/scroll-news.xml", Language::Zh, "CN", "general", 8, 0.8),
            ("people-world", "People's Daily World", "http://www.people.com.cn/rss/world.xml", Language::Zh, "CN", "world", 7, 0.75),
            ("npr-news", "NPR News", "https://feeds.npr.org/1001/rss.xml", Language::En, "US", "general", 8, 0.85),
            ("nyt-world", "New York Times World", "https://rss.nytimes.com/services/xml/rss/nyt/World.xml", Language::En, "US", "world", 9, 0.9),
            ("bbc-world", "BBC News World", "https://feeds.bbci.co.uk/news/world/rss.xml", Language::En, "GB", "world", 9, 0.9),
            ("nhk", "NHK News", "https://www3.nhk.or.jp/rss/news/cat0.xml", Language::Ja, "JP", "general", 9, 0.9),
            ("yonhap", "Yonhap", "https://www.yna.co.kr/rss/news.xml", Language::Ko, "KR", "general", 8, 0.8),
            ("elpais", "El País", "https://feeds.elpais.com/mrss-s/pages/ep/site/elpais.com/portada", Language::Es, "ES", "general", 8, 0.85),
            ("lemonde", "Le Monde", "https://www.lemonde.fr/rss/une.xml", Language::Fr, "FR", "general", 9, 0.9),
            ("tagesschau", "Tagesschau", "https://www.tagesschau.de/xml/rss2", Language::De, "DE", "general", 9, 0.9),
            ("g1", "G1", "https://g1.globo.com/rss/g1/", Language::Pt, "BR", "general", 7, 0.75),
            ("tass", "TASS", "https://tass.ru/rss/v2.xml", Language::Ru, "RU", "general", 7, 0.7),
            ("alarabiya", "Al Arabiya", "https://www.alarabiya.net/feed/rss2/ar.xml", Language::Ar, "SA", "general", 7, 0.7),
            ("ansa", "ANSA", "https://www.ansa.it/sito/ansait_rss.xml", Language::It, "IT", "general", 8, 0.8),
            ("vnexpress", "VnExpress", "https://vnexpress.net/rss/tin-moi-nhat.rss", Language::Vi, "VN", "general", 8, 0.8),
        ];

        let sources = FEEDS
            .iter()
            .filter_map(|&(id, name, endpoint, language, country, category, priority, quality)| {
                Some(Source {
                    id: id.to_string(),
                    name: name.to_string(),
                    endpoint: endpoint.to_string(),
                    language,
                    country: country.parse().ok()?,
                    category: category.to_string(),
                    priority,
                    quality_score: quality,
                    active: true,
                    crawl_interval_secs: 3600,
                    last_crawled_at: None,
                    kind: SourceKind::Rss,
                })
            })
            .map(|s| (s.id.clone(), s))
            .collect();
        Self { sources }
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Matching sources by priority, then quality score (both descending), then id.
    pub fn list(&self, filter: &SourceFilter) -> Vec<Source> {
        let mut out: Vec<Source> = self.sources.values().filter(|s| filter.matches(s)).cloned().collect();
        out.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| b.quality_score.total_cmp(&a.quality_score))
                .then_with(|| a.id.cmp(&b.id))
        });
        out
    }

    pub fn get(&self, id: &str) -> Result<&Source> {
        self.sources.get(id).ok_or_else(|| Error::SourceNotFound(id.to_string()))
    }

    /// Countries with at least one active source in `language`.
    pub fn locales_for(&self, language: Language) -> Vec<Country> {
        self.sources
            .values()
            .filter(|s| s.active && s.language == language)
            .map(|s| s.country.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn record_crawled(&mut self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let source = self.sources.get_mut(id).ok_or_else(|| Error::SourceNotFound(id.to_string()))?;
        source.last_crawled_at = Some(at);
        Ok(())
    }

    /// Sources are never removed, only switched off.
    pub fn deactivate(&mut self, id: &str) -> Result<()> {
        let source = self.sources.get_mut(id).ok_or_else(|| Error::SourceNotFound(id.to_string()))?;
        source.active = false;
        tracing::info!("Deactivated source {}", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn source(id: &str, language: Language, country: &str, priority: u8, quality: f32) -> Source {
        Source {
            id: id.to_string(),
            name: id.to_uppercase(),
            endpoint: format!("https://{id}.example/rss"),
            language,
            country: country.parse().unwrap(),
            category: "general".to_string(),
            priority,
            quality_score: quality,
            active: true,
            crawl_interval_secs: 3600,
            last_crawled_at: None,
            kind: SourceKind::Rss,
        }
    }

    #[test]
    fn test_list_orders_by_priority_quality_id() {
        let catalog = SourceCatalog::from_sources(vec![
            source("b", Language::Zh, "CN", 5, 0.5),
            source("a", Language::Zh, "CN", 5, 0.5),
            source("c", Language::Zh, "CN", 5, 0.9),
            source("d", Language::Zh, "CN", 9, 0.1),
            source("e", Language::En, "US", 10, 1.0),
        ])
        .unwrap();

        let filter = SourceFilter {
            language: Some(Language::Zh),
            ..SourceFilter::default()
        };
        let ids: Vec<String> = catalog.list(&filter).into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["d", "c", "a", "b"]);
        assert_eq!(catalog.list(&SourceFilter::default()).len(), 5);
    }

    #[test]
    fn test_locale_filter_and_deactivate() {
        let mut catalog = SourceCatalog::from_sources(vec![
            source("bbc", Language::En, "GB", 9, 0.9),
            source("npr", Language::En, "US", 8, 0.8),
        ])
        .unwrap();
        let us: Locale = "en".parse().unwrap();
        let gb: Locale = "en-GB".parse().unwrap();
        assert_eq!(catalog.list(&SourceFilter::for_locale(&us)).len(), 1);
        assert_eq!(catalog.list(&SourceFilter::for_locale(&gb))[0].id, "bbc");
        assert_eq!(catalog.locales_for(Language::En).len(), 2);

        catalog.deactivate("bbc").unwrap();
        assert!(catalog.list(&SourceFilter::for_locale(&gb)).is_empty());
        assert!(!catalog.get("bbc").unwrap().active);

        let at = Utc::now();
        catalog.record_crawled("npr", at).unwrap();
        assert_eq!(catalog.get("npr").unwrap().last_crawled_at, Some(at));
        assert!(matches!(catalog.get("missing"), Err(Error::SourceNotFound(_))));
    }

    #[test]
    fn test_validation() {
        let dup = SourceCatalog::from_sources(vec![
            source("a", Language::En, "US", 5, 0.5),
            source("a", Language::En, "US", 5, 0.5),
        ]);
        assert!(matches!(dup, Err(JobControlError::InvalidConfig(_))));
        assert!(SourceCatalog::from_sources(vec![source("a", Language::En, "US", 11, 0.5)]).is_err());
        assert!(SourceCatalog::from_sources(vec![source("a", Language::En, "US", 5, 1.5)]).is_err());

        let mut bad = source("a", Language::En, "US", 5, 0.5);
        bad.endpoint = "not a url".to_string();
        assert!(SourceCatalog::from_sources(vec![bad]).is_err());
    }

    #[test]
    fn test_builtin_covers_every_language() {
        let catalog = SourceCatalog::builtin();
        let all: Vec<Source> = catalog.list(&SourceFilter::default());
        assert!(SourceCatalog::from_sources(all).is_ok());
        for language in Language::ALL {
            let default: Locale = language.into();
            assert!(
                !catalog.list(&SourceFilter::for_locale(&default)).is_empty(),
                "no builtin source for {default}"
            );
        }
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"sources": [{{"id": "lemonde", "name": "Le Monde", "endpoint": "https://www.lemonde.fr/rss/une.xml",
                "language": "fr", "country": "FR", "priority": 9}}]}}"#
        )
        .unwrap();
        let catalog = SourceCatalog::from_json_file(file.path()).unwrap();
        let source = catalog.get("lemonde").unwrap();
        assert_eq!(source.quality_score, 0.5);
        assert!(source.active);
        assert_eq!(source.kind, SourceKind::Rss);
    }
}
