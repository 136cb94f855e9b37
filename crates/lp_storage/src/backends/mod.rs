pub mod file;
pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use file::FileStorage;
pub use memory::MemoryStorage;

#[cfg(feature = "sqlite")]
pub use sqlite::SQLiteStorage;

#[cfg(test)]
pub(crate) mod fixtures {
    use std::collections::BTreeMap;

    use chrono::Utc;
    use lp_core::{
        AiModel, CrawlConfig, CrawlJob, JobRecord, Language, Locale, MultiLanguageContent, PolishedArticle,
    };

    pub fn article(slug: &str) -> PolishedArticle {
        PolishedArticle {
            title: MultiLanguageContent::new("Test Article").unwrap(),
            content: MultiLanguageContent::new("This is a test article about politics.").unwrap(),
            summary: MultiLanguageContent::new("A test.").unwrap(),
            category: "politics".to_string(),
            slug: slug.to_string(),
            source_id: "test".to_string(),
            source_name: "Test".to_string(),
            source_url: format!("http://test.com/{slug}"),
            original_language: Language::En,
            published_at: Utc::now(),
            ai_model: AiModel::Disabled,
            processed_at: Utc::now(),
        }
    }

    pub fn record() -> JobRecord {
        let zh: Locale = "zh".parse().unwrap();
        let counts = BTreeMap::from([(zh.clone(), 2)]);
        JobRecord::new(CrawlJob::new(CrawlConfig::new(vec![zh], 3), &counts))
    }
}
