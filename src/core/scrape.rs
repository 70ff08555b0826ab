use std::collections::HashSet;
use std::sync::LazyLock;

use base64::Engine;
use regex::Regex;
use scraper::{Html, Selector};

use medialoader_core::models::media::Item;

use crate::core::url_parser;

/// Minimum length for a paragraph to count as a description.
pub const MIN_PARAGRAPH_CHARS: usize = 80;
/// Distinct function words a paragraph must contain to count as prose.
pub const MIN_FUNCTION_WORDS: usize = 2;

const FUNCTION_WORDS: &[&str] = &[
    // de
    "der", "die", "das", "und", "ist", "mit", "ein", "eine", "nicht", "auf", "sich", "für", "von",
    "den", "dem", "zu", "im", "wird", "sie", "er",
    // en
    "the", "and", "is", "of", "with", "a", "an", "to", "in", "for", "on", "this", "that", "his",
    "her", "their",
];

static META_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("meta").unwrap());
static TITLE_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title").unwrap());
static P_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("p").unwrap());
static LD_JSON_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"script[type="application/ld+json"]"#).unwrap());
static INITIAL_STATE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("script#initial-state").unwrap());
static NEXT_DATA_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("script#__NEXT_DATA__").unwrap());
static WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\p{L}]+").unwrap());
static ISO_DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^P(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+(?:\.\d+)?)S)?)?$").unwrap()
});

pub async fn fetch_html(client: &reqwest::Client, url: &str) -> anyhow::Result<String> {
    let response = client.get(url).send().await?.error_for_status()?;
    Ok(response.text().await?)
}

fn meta_content(doc: &Html, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        doc.select(&META_SEL).find_map(|el| {
            let attrs = el.value();
            let matches = attrs.attr("property") == Some(key) || attrs.attr("name") == Some(key);
            if !matches {
                return None;
            }
            attrs
                .attr("content")
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
        })
    })
}

/// All structured-data objects on the page, with top-level arrays and
/// `@graph` containers flattened.
pub fn ld_json_blocks(doc: &Html) -> Vec<serde_json::Value> {
    let mut out = Vec::new();
    for el in doc.select(&LD_JSON_SEL) {
        let text = el.text().collect::<String>();
        let Ok(value) = serde_json::from_str::<serde_json::Value>(text.trim()) else {
            continue;
        };
        flatten_ld(value, &mut out);
    }
    out
}

fn flatten_ld(value: serde_json::Value, out: &mut Vec<serde_json::Value>) {
    match value {
        serde_json::Value::Array(items) => items.into_iter().for_each(|v| flatten_ld(v, out)),
        serde_json::Value::Object(mut map) => {
            if let Some(graph) = map.remove("@graph") {
                flatten_ld(graph, out);
            }
            if !map.is_empty() {
                out.push(serde_json::Value::Object(map));
            }
        }
        _ => {}
    }
}

/// JSON state embedded by single-page apps: a base64 (or plain) JSON
/// `initial-state` script, `__NEXT_DATA__`, then structured-data blocks.
pub fn embedded_state(html: &str) -> Vec<serde_json::Value> {
    let doc = Html::parse_document(html);
    let mut states = Vec::new();

    for el in doc.select(&INITIAL_STATE_SEL) {
        let text = el.text().collect::<String>();
        let text = text.trim();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(text)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok());
        let candidate = decoded.as_deref().unwrap_or(text);
        if let Ok(value) = serde_json::from_str(candidate) {
            states.push(value);
        }
    }

    for el in doc.select(&NEXT_DATA_SEL) {
        let text = el.text().collect::<String>();
        if let Ok(value) = serde_json::from_str(text.trim()) {
            states.push(value);
        }
    }

    states.extend(ld_json_blocks(&doc));
    states
}

/// Accepts a paragraph as prose only if it is long enough and reads like a
/// sentence in one of the supported languages.
pub fn looks_like_prose(text: &str) -> bool {
    if text.chars().count() < MIN_PARAGRAPH_CHARS {
        return false;
    }
    let found: HashSet<String> = WORD_RE
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .filter(|w| FUNCTION_WORDS.contains(&w.as_str()))
        .collect();
    found.len() >= MIN_FUNCTION_WORDS
}

fn paragraph_description(doc: &Html) -> Option<String> {
    doc.select(&P_SEL)
        .map(|p| {
            p.text()
                .collect::<String>()
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
        })
        .find(|text| looks_like_prose(text))
}

fn ld_string(block: &serde_json::Value, key: &str) -> Option<String> {
    match block.get(key)? {
        serde_json::Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        serde_json::Value::Object(obj) => obj
            .get("name")
            .and_then(|n| n.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
        serde_json::Value::Array(items) => items.iter().find_map(|v| match v {
            serde_json::Value::String(s) => Some(s.clone()),
            other => other.get("name").and_then(|n| n.as_str()).map(str::to_string),
        }),
        _ => None,
    }
}

/// Description by pattern order: meta description, structured data, then the
/// first paragraph that passes [`looks_like_prose`].
pub fn description(doc: &Html) -> Option<String> {
    meta_content(doc, &["og:description", "description", "twitter:description"])
        .or_else(|| {
            ld_json_blocks(doc)
                .iter()
                .find_map(|b| ld_string(b, "description"))
        })
        .or_else(|| paragraph_description(doc))
}

pub fn parse_iso_duration(text: &str) -> Option<f64> {
    let caps = ISO_DURATION_RE.captures(text.trim())?;
    let part = |i: usize| -> f64 {
        caps.get(i)
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .unwrap_or(0.0)
    };
    let total = part(1) * 86400.0 + part(2) * 3600.0 + part(3) * 60.0 + part(4);
    (total > 0.0).then_some(total)
}

/// Builds an item from a raw page. Returns `None` when no title can be found.
pub fn extract_item(html: &str, url: &str) -> Option<Item> {
    let doc = Html::parse_document(html);
    let blocks = ld_json_blocks(&doc);

    let title = meta_content(&doc, &["og:title", "twitter:title"])
        .or_else(|| blocks.iter().find_map(|b| ld_string(b, "name")))
        .or_else(|| {
            doc.select(&TITLE_SEL)
                .next()
                .map(|t| t.text().collect::<String>().trim().to_string())
                .filter(|t| !t.is_empty())
        })?;

    let artist = blocks
        .iter()
        .find_map(|b| {
            ld_string(b, "byArtist")
                .or_else(|| ld_string(b, "author"))
                .or_else(|| ld_string(b, "creator"))
        })
        .or_else(|| meta_content(&doc, &["music:musician_description", "twitter:audio:artist_name", "author"]))
        .unwrap_or_default();

    let duration = blocks
        .iter()
        .find_map(|b| b.get("duration").and_then(|d| d.as_str()).and_then(parse_iso_duration))
        .or_else(|| {
            meta_content(&doc, &["music:duration", "video:duration", "og:video:duration"])
                .and_then(|d| d.parse::<f64>().ok())
        })
        .unwrap_or(0.0);

    let id = url_parser::resolve(url)
        .map(|link| link.id)
        .unwrap_or_else(|| url.to_string());

    let mut item = Item::new(id, title, url)
        .with_artist(artist)
        .with_duration(duration);
    item.description = description(&doc);
    Some(item)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prose_gate_rejects_navigation() {
        assert!(!looks_like_prose("Home | Mediathek | Sendungen A-Z | Live | Login | Suche | Hilfe | Kontakt | Impressum"));
        assert!(looks_like_prose(
            "Die Kommissarin ermittelt in einem Fall, der sie an die Grenzen ihrer Belastbarkeit bringt und das Team spaltet."
        ));
        assert!(!looks_like_prose("Zu kurz und der Rest fehlt."));
    }

    #[test]
    fn description_order_meta_first() {
        let html = r#"<html><head>
            <meta property="og:description" content="From meta">
            <script type="application/ld+json">{"description": "From ld"}</script>
            </head><body></body></html>"#;
        assert_eq!(description(&Html::parse_document(html)).as_deref(), Some("From meta"));
    }

    #[test]
    fn description_falls_back_to_ld_then_paragraph() {
        let html = r#"<html><head>
            <script type="application/ld+json">{"@graph": [{"@type": "VideoObject", "description": "From graph"}]}</script>
            </head></html>"#;
        assert_eq!(description(&Html::parse_document(html)).as_deref(), Some("From graph"));

        let html = r#"<html><body>
            <p>Menu Start Suche</p>
            <p>The documentary follows a family of farmers through one year in the Alps and shows the work that keeps them going.</p>
            </body></html>"#;
        let text = description(&Html::parse_document(html)).unwrap();
        assert!(text.starts_with("The documentary"));
    }

    #[test]
    fn iso_durations() {
        assert_eq!(parse_iso_duration("PT3M15S"), Some(195.0));
        assert_eq!(parse_iso_duration("PT1H2M"), Some(3720.0));
        assert_eq!(parse_iso_duration("P0D"), None);
        assert_eq!(parse_iso_duration("3:15"), None);
    }

    #[test]
    fn item_from_page() {
        let html = r#"<html><head>
            <meta property="og:title" content="Song Name">
            <meta name="music:musician_description" content="Some Band">
            <meta name="music:duration" content="201">
            </head></html>"#;
        let item = extract_item(html, "https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC").unwrap();
        assert_eq!(item.id, "4uLU6hMCjMI75M1A2tKUQC");
        assert_eq!(item.title, "Song Name");
        assert_eq!(item.artist, "Some Band");
        assert_eq!(item.duration_seconds, 201.0);
    }

    #[test]
    fn embedded_state_decodes_base64() {
        let json = r#"{"entities": {"items": {}}}"#;
        let encoded = base64::engine::general_purpose::STANDARD.encode(json);
        let html = format!(
            r#"<html><body><script id="initial-state" type="text/plain">{}</script>
            <script id="__NEXT_DATA__" type="application/json">{{"props": {{}}}}</script></body></html>"#,
            encoded
        );
        let states = embedded_state(&html);
        assert_eq!(states.len(), 2);
        assert!(states[0].get("entities").is_some());
        assert!(states[1].get("props").is_some());
    }

    #[test]
    fn no_title_no_item() {
        assert!(extract_item("<html><body></body></html>", "https://example.org").is_none());
    }
}
