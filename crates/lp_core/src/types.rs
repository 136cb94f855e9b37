use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::JobControlError;

/// Languages the pipeline can crawl and translate into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Zh,
    En,
    Ja,
    Ko,
    Es,
    Fr,
    De,
    Pt,
    Ru,
    Ar,
    It,
    Vi,
}

impl Language {
    pub const ALL: [Language; 12] = [
        Language::Zh,
        Language::En,
        Language::Ja,
        Language::Ko,
        Language::Es,
        Language::Fr,
        Language::De,
        Language::Pt,
        Language::Ru,
        Language::Ar,
        Language::It,
        Language::Vi,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Language::Zh => "zh",
            Language::En => "en",
            Language::Ja => "ja",
            Language::Ko => "ko",
            Language::Es => "es",
            Language::Fr => "fr",
            Language::De => "de",
            Language::Pt => "pt",
            Language::Ru => "ru",
            Language::Ar => "ar",
            Language::It => "it",
            Language::Vi => "vi",
        }
    }

    /// Name used when talking to the AI provider.
    pub fn english_name(self) -> &'static str {
        match self {
            Language::Zh => "Simplified Chinese",
            Language::En => "English",
            Language::Ja => "Japanese",
            Language::Ko => "Korean",
            Language::Es => "Spanish",
            Language::Fr => "French",
            Language::De => "German",
            Language::Pt => "Portuguese",
            Language::Ru => "Russian",
            Language::Ar => "Arabic",
            Language::It => "Italian",
            Language::Vi => "Vietnamese",
        }
    }

    pub fn default_country(self) -> Country {
        let code = match self {
            Language::Zh => "CN",
            Language::En => "US",
            Language::Ja => "JP",
            Language::Ko => "KR",
            Language::Es => "ES",
            Language::Fr => "FR",
            Language::De => "DE",
            Language::Pt => "BR",
            Language::Ru => "RU",
            Language::Ar => "SA",
            Language::It => "IT",
            Language::Vi => "VN",
        };
        Country(code.to_string())
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = JobControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim().to_ascii_lowercase();
        Language::ALL
            .into_iter()
            .find(|lang| lang.code() == code)
            .ok_or_else(|| JobControlError::InvalidConfig(format!("unsupported language code: {s}")))
    }
}

/// Two-letter uppercase region code.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Country(String);

impl Country {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Country {
    type Err = JobControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim();
        if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(JobControlError::InvalidConfig(format!("invalid country code: {s}")));
        }
        Ok(Country(code.to_ascii_uppercase()))
    }
}

impl TryFrom<String> for Country {
    type Error = JobControlError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Country> for String {
    fn from(country: Country) -> Self {
        country.0
    }
}

impl fmt::Display for Country {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A crawl unit key: `zh` parses to `zh-CN`, `en-GB` keeps its region.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Locale {
    pub language: Language,
    pub country: Country,
}

impl Locale {
    pub fn new(language: Language, country: Country) -> Self {
        Self { language, country }
    }
}

impl From<Language> for Locale {
    fn from(language: Language) -> Self {
        Self::new(language, language.default_country())
    }
}

impl FromStr for Locale {
    type Err = JobControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once(['-', '_']) {
            Some((lang, country)) => Ok(Self::new(lang.parse()?, country.parse()?)),
            None => Ok(Self::from(s.parse::<Language>()?)),
        }
    }
}

impl TryFrom<String> for Locale {
    type Error = JobControlError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Locale> for String {
    fn from(locale: Locale) -> Self {
        locale.to_string()
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.language, self.country)
    }
}

/// How the fetcher should extract articles from a source endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Rss,
    Html,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub name: String,
    pub endpoint: String,
    pub language: Language,
    pub country: Country,
    #[serde(default)]
    pub category: String,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default = "default_quality")]
    pub quality_score: f32,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default = "default_crawl_interval")]
    pub crawl_interval_secs: u64,
    #[serde(default)]
    pub last_crawled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub kind: SourceKind,
}

fn default_priority() -> u8 {
    5
}

fn default_quality() -> f32 {
    0.5
}

fn default_active() -> bool {
    true
}

fn default_crawl_interval() -> u64 {
    3600
}

impl Source {
    pub fn locale(&self) -> Locale {
        Locale::new(self.language, self.country.clone())
    }
}

/// Unprocessed article as extracted from a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawArticle {
    pub source_id: String,
    pub language: Language,
    pub title: String,
    pub body: String,
    pub summary: String,
    pub published_at: DateTime<Utc>,
    pub url: String,
    pub extracted_at: DateTime<Utc>,
}

impl RawArticle {
    /// Returns `None` when the title or body is blank. A missing summary is
    /// derived from the leading sentences of the body.
    pub fn new(
        source: &Source,
        url: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
        summary: Option<String>,
        published_at: DateTime<Utc>,
    ) -> Option<Self> {
        let title = title.into().trim().to_string();
        let body = body.into().trim().to_string();
        if title.is_empty() || body.is_empty() {
            return None;
        }
        let summary = summary
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| derive_summary(&body, 3));

        Some(Self {
            source_id: source.id.clone(),
            language: source.language,
            title,
            body,
            summary,
            published_at,
            url: url.into(),
            extracted_at: Utc::now(),
        })
    }
}

/// First `sentences` sentences of `text`, terminators included.
pub fn derive_summary(text: &str, sentences: usize) -> String {
    let mut out = String::new();
    let mut count = 0;
    for c in text.chars() {
        out.push(c);
        if matches!(c, '.' | '!' | '?' | '。' | '！' | '？') {
            count += 1;
            if count == sentences {
                break;
            }
        }
    }
    out.trim().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Title,
    Content,
    Summary,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FieldKind::Title => "title",
            FieldKind::Content => "content",
            FieldKind::Summary => "summary",
        })
    }
}

impl FromStr for FieldKind {
    type Err = JobControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "title" => Ok(FieldKind::Title),
            "content" => Ok(FieldKind::Content),
            "summary" => Ok(FieldKind::Summary),
            other => Err(JobControlError::InvalidConfig(format!("unknown field: {other}"))),
        }
    }
}

/// Per-field language map. The `default` entry holds the (polished) original
/// text and is never empty; merges only ever add or replace single keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiLanguageContent {
    default: String,
    #[serde(flatten)]
    translations: BTreeMap<Language, String>,
}

impl MultiLanguageContent {
    pub fn new(default: impl Into<String>) -> Option<Self> {
        let default = default.into();
        if default.trim().is_empty() {
            return None;
        }
        Some(Self {
            default,
            translations: BTreeMap::new(),
        })
    }

    pub fn default_text(&self) -> &str {
        &self.default
    }

    pub fn get(&self, language: Language) -> Option<&str> {
        self.translations.get(&language).map(String::as_str)
    }

    /// Adds or replaces one language. Blank text is ignored.
    pub fn merge(&mut self, language: Language, text: impl Into<String>) {
        let text = text.into();
        if !text.trim().is_empty() {
            self.translations.insert(language, text);
        }
    }

    pub fn languages(&self) -> impl Iterator<Item = Language> + '_ {
        self.translations.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.translations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.translations.is_empty()
    }
}

/// Selector for the AI provider used by a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiModel {
    #[default]
    DeepSeek,
    OpenAi,
    Ollama,
    /// Deterministic offline provider
    Dummy,
    Disabled,
}

impl fmt::Display for AiModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AiModel::DeepSeek => "deepseek",
            AiModel::OpenAi => "openai",
            AiModel::Ollama => "ollama",
            AiModel::Dummy => "dummy",
            AiModel::Disabled => "disabled",
        })
    }
}

impl FromStr for AiModel {
    type Err = JobControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deepseek" => Ok(AiModel::DeepSeek),
            "openai" => Ok(AiModel::OpenAi),
            "ollama" => Ok(AiModel::Ollama),
            "dummy" => Ok(AiModel::Dummy),
            "disabled" | "none" => Ok(AiModel::Disabled),
            other => Err(JobControlError::InvalidConfig(format!("unknown AI model: {other}"))),
        }
    }
}

/// Final multi-language artifact handed to the persistence gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolishedArticle {
    pub title: MultiLanguageContent,
    pub content: MultiLanguageContent,
    pub summary: MultiLanguageContent,
    pub category: String,
    pub slug: String,
    pub source_id: String,
    pub source_name: String,
    pub source_url: String,
    pub original_language: Language,
    pub published_at: DateTime<Utc>,
    pub ai_model: AiModel,
    pub processed_at: DateTime<Utc>,
}

impl PolishedArticle {
    pub fn field(&self, field: FieldKind) -> &MultiLanguageContent {
        match field {
            FieldKind::Title => &self.title,
            FieldKind::Content => &self.content,
            FieldKind::Summary => &self.summary,
        }
    }

    pub fn field_mut(&mut self, field: FieldKind) -> &mut MultiLanguageContent {
        match field {
            FieldKind::Title => &mut self.title,
            FieldKind::Content => &mut self.content,
            FieldKind::Summary => &mut self.summary,
        }
    }
}

/// ASCII words of the title (at most 8) followed by a short hash of the URL,
/// so non-Latin titles still get unique, stable slugs.
pub fn make_slug(title: &str, url: &str) -> String {
    let words: Vec<String> = title
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .take(8)
        .map(|w| w.to_ascii_lowercase())
        .collect();

    let digest = Sha256::digest(url.as_bytes());
    let hash: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();

    if words.is_empty() {
        hash
    } else {
        format!("{}-{}", words.join("-"), hash)
    }
}
