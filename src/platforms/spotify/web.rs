use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use medialoader_core::models::media::Item;

use crate::core::scrape;

static TRACK_URI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^spotify:track:([A-Za-z0-9]{22})$").unwrap());
static TRACK_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/track/([A-Za-z0-9]{22})").unwrap());
static ALBUM_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/album/([A-Za-z0-9]{22})").unwrap());

pub fn page_url(kind: &str, id: &str) -> String {
    format!("https://open.spotify.com/{}/{}", kind, id)
}

pub fn track_url(id: &str) -> String {
    page_url("track", id)
}

fn artist_name(node: &serde_json::Value) -> Option<String> {
    let artists = node.get("artists")?;
    let first = artists
        .as_array()
        .and_then(|a| a.first())
        .or_else(|| artists.pointer("/items/0"))?;
    first
        .get("name")
        .or_else(|| first.pointer("/profile/name"))
        .and_then(|n| n.as_str())
        .map(str::to_string)
}

fn collect_tracks(node: &serde_json::Value, fallback_artist: &str, seen: &mut HashSet<String>, out: &mut Vec<Item>) {
    match node {
        serde_json::Value::Object(map) => {
            let id = map
                .get("uri")
                .and_then(|u| u.as_str())
                .and_then(|u| TRACK_URI_RE.captures(u))
                .map(|c| c[1].to_string());
            if let Some(id) = id {
                let title = map.get("name").and_then(|n| n.as_str()).unwrap_or("");
                if !title.is_empty() && seen.insert(id.clone()) {
                    let artist = artist_name(node).unwrap_or_else(|| fallback_artist.to_string());
                    let duration = map
                        .get("duration_ms")
                        .or_else(|| map.get("duration").and_then(|d| d.get("totalMilliseconds")))
                        .and_then(|d| d.as_f64())
                        .map(|ms| ms / 1000.0)
                        .unwrap_or(0.0);
                    out.push(
                        Item::new(id.clone(), title, track_url(&id))
                            .with_artist(artist)
                            .with_duration(duration),
                    );
                }
            }
            for value in map.values() {
                collect_tracks(value, fallback_artist, seen, out);
            }
        }
        serde_json::Value::Array(values) => {
            for value in values {
                collect_tracks(value, fallback_artist, seen, out);
            }
        }
        _ => {}
    }
}

/// Named tracks found anywhere in embedded page state. Array order is kept.
pub fn tracks_from_state(states: &[serde_json::Value], fallback_artist: &str) -> Vec<Item> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for state in states {
        collect_tracks(state, fallback_artist, &mut seen, &mut out);
    }
    out
}

fn linked_ids(html: &str, re: &Regex) -> Vec<String> {
    let mut seen = HashSet::new();
    re.captures_iter(html)
        .map(|c| c[1].to_string())
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

/// Track ids linked from the page. The items carry no title yet.
pub fn linked_tracks(html: &str) -> Vec<Item> {
    linked_ids(html, &TRACK_LINK_RE)
        .into_iter()
        .map(|id| Item::new(id.clone(), "", track_url(&id)))
        .collect()
}

pub fn linked_album_ids(html: &str) -> Vec<String> {
    linked_ids(html, &ALBUM_LINK_RE)
}

pub async fn fetch_page(http: &reqwest::Client, kind: &str, id: &str) -> anyhow::Result<String> {
    scrape::fetch_html(http, &page_url(kind, id)).await
}

/// Items of a public page without API access: embedded state when present,
/// otherwise bare linked track ids.
pub fn items_from_page(html: &str, url: &str) -> (String, Vec<Item>) {
    let name = scrape::extract_item(html, url)
        .map(|i| i.title)
        .unwrap_or_default();
    let from_state = tracks_from_state(&scrape::embedded_state(html), &name);
    if !from_state.is_empty() {
        return (name, from_state);
    }
    (name, linked_tracks(html))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tracks_found_in_nested_state() {
        let state = json!({
            "entities": {
                "items": {
                    "spotify:artist:0gxyHStUsqpMadRV0Di1Qt": {
                        "profile": {"name": "Rick Astley"},
                        "discography": {"topTracks": {"items": [
                            {"track": {"uri": "spotify:track:4uLU6hMCjMI75M1A2tKUQC", "name": "Never Gonna Give You Up",
                                       "duration": {"totalMilliseconds": 213573}}},
                            {"track": {"uri": "spotify:track:6JEK0CvvjDjjMUBFoXShNZ", "name": "Together Forever",
                                       "artists": {"items": [{"profile": {"name": "Rick Astley"}}]}}},
                            {"track": {"uri": "spotify:track:4uLU6hMCjMI75M1A2tKUQC", "name": "dup"}}
                        ]}}
                    }
                }
            }
        });
        let items = tracks_from_state(&[state], "Fallback");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "Never Gonna Give You Up");
        assert_eq!(items[0].artist, "Fallback");
        assert!((items[0].duration_seconds - 213.573).abs() < 1e-9);
        assert_eq!(items[1].artist, "Rick Astley");
    }

    #[test]
    fn links_deduplicated_in_order() {
        let html = r#"<a href="/track/4uLU6hMCjMI75M1A2tKUQC">a</a>
            <a href="https://open.spotify.com/track/6JEK0CvvjDjjMUBFoXShNZ">b</a>
            <a href="/track/4uLU6hMCjMI75M1A2tKUQC">again</a>
            <a href="/album/6N9PS4QXF1D0OWPk0Sxtb4">album</a>"#;
        let tracks = linked_tracks(html);
        assert_eq!(tracks.len(), 2);
        assert!(tracks.iter().all(|t| t.needs_metadata()));
        assert_eq!(linked_album_ids(html), vec!["6N9PS4QXF1D0OWPk0Sxtb4"]);
    }
}
