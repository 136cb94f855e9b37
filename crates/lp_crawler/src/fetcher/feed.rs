use lp_core::{FetchError, RawArticle, Source};
use quick_xml::de::from_str;
use serde::Deserialize;

use super::FetchOptions;
use super::text::{html_to_text, parse_date, scrub_html_entities};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    guid: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

/// Parses an RSS 2.0 document. Items without a title or body are dropped, and
/// so are undated items when only today's news is wanted.
pub fn parse_feed(xml: &str, source: &Source, options: &FetchOptions) -> Result<Vec<RawArticle>, FetchError> {
    let xml = scrub_html_entities(xml);
    let rss: Rss = from_str(&xml).map_err(|e| FetchError::ParseError(format!("{}: {e}", source.id)))?;

    let mut out = Vec::with_capacity(rss.channel.items.len());
    for item in rss.channel.items {
        let Some(url) = item.link.or(item.guid).map(|u| u.trim().to_string()).filter(|u| !u.is_empty()) else {
            continue;
        };
        let title = html_to_text(item.title.as_deref().unwrap_or_default());
        let body = html_to_text(item.description.as_deref().unwrap_or_default());
        let Some(published_at) = item.pub_date.as_deref().and_then(parse_date).or_else(|| options.undated()) else {
            tracing::debug!("Dropping undated item {} from {}", url, source.id);
            continue;
        };

        if let Some(article) = RawArticle::new(source, url, title, body, None, published_at) {
            out.push(article);
        }
    }
    tracing::debug!("Parsed {} items from {}", out.len(), source.id);
    Ok(out)
}
