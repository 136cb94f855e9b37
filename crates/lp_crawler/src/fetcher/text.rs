use chrono::{DateTime, Utc};
use scraper::Html;

/// Replaces HTML named entities that XML parsers reject.
pub fn scrub_html_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}

/// Collapses runs of spaces and tabs, keeps single blank lines between paragraphs.
pub fn normalize_whitespace(s: &str) -> String {
    let mut paragraphs = Vec::new();
    let mut current = Vec::new();
    for line in s.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join(" "));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join(" "));
    }
    paragraphs.join("\n\n")
}

/// Plain text of an HTML fragment such as an RSS description.
pub fn html_to_text(fragment: &str) -> String {
    if !fragment.contains('<') {
        return normalize_whitespace(&scrub_html_entities(fragment));
    }
    let parsed = Html::parse_fragment(fragment);
    let text: String = parsed.root_element().text().collect::<Vec<_>>().join(" ");
    normalize_whitespace(&text)
}

/// RFC 2822 (RSS) or RFC 3339 (JSON-LD, Atom) timestamps.
pub fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    DateTime::parse_from_rfc2822(s)
        .or_else(|_| DateTime::parse_from_rfc3339(s))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}
