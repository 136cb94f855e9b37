use lp_core::{FetchError, RawArticle, Source};
use scraper::{Html, Selector};
use serde_json::Value;

use super::FetchOptions;
use super::text::{html_to_text, normalize_whitespace, parse_date};

fn selector(css: &str) -> Result<Selector, FetchError> {
    Selector::parse(css).map_err(|e| FetchError::ParseError(format!("invalid selector {css}: {e}")))
}

fn is_article_type(value: &Value) -> bool {
    let matches = |t: &str| matches!(t, "NewsArticle" | "Article" | "ReportageNewsArticle" | "BlogPosting");
    match value.get("@type") {
        Some(Value::String(t)) => matches(t),
        Some(Value::Array(types)) => types.iter().filter_map(Value::as_str).any(matches),
        _ => false,
    }
}

/// Flattens top-level arrays and `@graph` containers into candidate objects.
fn collect_nodes(value: Value, out: &mut Vec<Value>) {
    match value {
        Value::Array(items) => items.into_iter().for_each(|v| collect_nodes(v, out)),
        Value::Object(mut map) => {
            if let Some(graph) = map.remove("@graph") {
                collect_nodes(graph, out);
            }
            out.push(Value::Object(map));
        }
        _ => {}
    }
}

fn text_field(node: &Value, key: &str) -> Option<String> {
    node.get(key).and_then(Value::as_str).map(html_to_text).filter(|s| !s.is_empty())
}

fn from_json_ld(
    document: &Html,
    source: &Source,
    page_url: &str,
    options: &FetchOptions,
) -> Result<Vec<RawArticle>, FetchError> {
    let scripts = selector("script[type='application/ld+json']")?;
    let mut nodes = Vec::new();
    for script in document.select(&scripts) {
        let raw = script.text().collect::<String>();
        match serde_json::from_str::<Value>(raw.trim()) {
            Ok(value) => collect_nodes(value, &mut nodes),
            Err(e) => tracing::debug!("Skipping unparseable JSON-LD on {}: {}", page_url, e),
        }
    }

    Ok(nodes
        .iter()
        .filter(|node| is_article_type(node))
        .filter_map(|node| {
            let title = text_field(node, "headline").or_else(|| text_field(node, "name"))?;
            let body = text_field(node, "articleBody").or_else(|| text_field(node, "description"))?;
            let summary = text_field(node, "description").filter(|d| *d != body);
            let url = text_field(node, "url").unwrap_or_else(|| page_url.to_string());
            let published_at = node
                .get("datePublished")
                .and_then(Value::as_str)
                .and_then(parse_date)
                .or_else(|| options.undated())?;
            RawArticle::new(source, url, title, body, summary, published_at)
        })
        .collect())
}

fn from_markup(
    document: &Html,
    source: &Source,
    page_url: &str,
    options: &FetchOptions,
) -> Result<Option<RawArticle>, FetchError> {
    let h1 = selector("h1")?;
    let paragraphs = selector("article p")?;
    let published = selector("meta[property='article:published_time']")?;

    let title = document
        .select(&h1)
        .next()
        .map(|el| normalize_whitespace(&el.text().collect::<String>()))
        .unwrap_or_default();
    let body = document
        .select(&paragraphs)
        .map(|el| normalize_whitespace(&el.text().collect::<String>()))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    let Some(published_at) = document
        .select(&published)
        .next()
        .and_then(|el| el.value().attr("content"))
        .and_then(parse_date)
        .or_else(|| options.undated())
    else {
        return Ok(None);
    };

    Ok(RawArticle::new(source, page_url, title, body, None, published_at))
}

/// Extracts articles from an HTML page: JSON-LD article blocks first, then the
/// page's `<h1>` and `<article>` paragraphs. Undated articles are skipped
/// under the date filter.
pub fn parse_page(
    html: &str,
    source: &Source,
    page_url: &str,
    options: &FetchOptions,
) -> Result<Vec<RawArticle>, FetchError> {
    let document = Html::parse_document(html);
    let articles = from_json_ld(&document, source, page_url, options)?;
    if !articles.is_empty() {
        return Ok(articles);
    }
    Ok(from_markup(&document, source, page_url, options)?.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::static_fetcher::test_source;
    use lp_core::Language;

    #[test]
    fn test_json_ld_graph() {
        let html = r#"<html><head>
            <script type="application/ld+json">
            {"@context": "https://schema.org", "@graph": [
                {"@type": "WebSite", "name": "Le Site"},
                {"@type": ["NewsArticle"], "headline": "Grève nationale",
                 "articleBody": "Les syndicats appellent à la grève. Les trains sont à l'arrêt.",
                 "datePublished": "2024-03-05T07:00:00+01:00",
                 "url": "https://site.example/greve"}
            ]}
            </script></head><body><h1>Ignored</h1></body></html>"#;
        let source = test_source("site", Language::Fr);
        let articles = parse_page(html, &source, "https://site.example/", &FetchOptions::default()).unwrap();
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].title, "Grève nationale");
        assert_eq!(articles[0].url, "https://site.example/greve");
        assert_eq!(articles[0].published_at.to_rfc3339(), "2024-03-05T06:00:00+00:00");
        assert_eq!(articles[0].language, Language::Fr);
    }

    #[test]
    fn test_markup_fallback() {
        let html = r#"<html><body><h1> Headline  here </h1>
            <article><p>First paragraph.</p><p></p><p>Second   paragraph.</p></article></body></html>"#;
        let source = test_source("site", Language::En);
        let articles = parse_page(html, &source, "https://site.example/a", &FetchOptions::default()).unwrap();
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].title, "Headline here");
        assert_eq!(articles[0].body, "First paragraph.\n\nSecond paragraph.");
        assert_eq!(articles[0].url, "https://site.example/a");
    }

    #[test]
    fn test_page_without_article_yields_nothing() {
        let source = test_source("site", Language::En);
        let articles = parse_page("<html><body><p>nav</p></body></html>", &source, "https://x.example", &FetchOptions::default());
        assert!(articles.unwrap().is_empty());
    }

    #[test]
    fn test_undated_markup_is_skipped_under_date_filter() {
        let html = r#"<html><body><h1>Headline</h1><article><p>Body text.</p></article></body></html>"#;
        let source = test_source("site", Language::En);
        let options = FetchOptions {
            date_filter: true,
            ..FetchOptions::default()
        };
        assert!(parse_page(html, &source, "https://site.example/a", &options).unwrap().is_empty());
        assert_eq!(parse_page(html, &source, "https://site.example/a", &FetchOptions::default()).unwrap().len(), 1);
    }
}
