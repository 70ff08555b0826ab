pub mod web;

use std::time::Duration;

use medialoader_core::models::media::{Collection, Item};
use medialoader_core::models::settings::CatalogSettings;

use crate::core::auth::{ClientCredentials, TokenCache};

/// Catalog API client: typed track and collection endpoints behind a cached
/// client-credentials token.
pub struct SpotifyClient {
    api_base: String,
    tokens: TokenCache,
    page_size: u32,
}

impl SpotifyClient {
    /// `None` when no credentials are configured.
    pub fn from_settings(http: reqwest::Client, catalog: &CatalogSettings, page_size: u32) -> Option<Self> {
        if !catalog.is_configured() {
            return None;
        }
        let credentials = ClientCredentials {
            client_id: catalog.client_id.trim().to_string(),
            client_secret: catalog.client_secret.trim().to_string(),
        };
        Some(Self {
            api_base: catalog.api_base.trim_end_matches('/').to_string(),
            tokens: TokenCache::new(http, &catalog.token_url, credentials),
            page_size: page_size.clamp(1, 50),
        })
    }

    /// Installs an already issued bearer token.
    pub async fn prime_token(&self, token: &str, ttl: Duration) {
        self.tokens.prime(token, ttl).await;
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }

    pub async fn track(&self, id: &str) -> anyhow::Result<Item> {
        let json = self
            .tokens
            .authorized_get(&self.endpoint(&format!("tracks/{}", id)), &[])
            .await?;
        track_from_json(&json).ok_or_else(|| anyhow::anyhow!("Unexpected track payload for {}", id))
    }

    pub async fn album(&self, id: &str) -> anyhow::Result<Collection> {
        let album = self
            .tokens
            .authorized_get(&self.endpoint(&format!("albums/{}", id)), &[])
            .await?;
        let name = album
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or(id)
            .to_string();
        let album_artist = first_artist(&album);

        let pages = self.paginate(&format!("albums/{}/tracks", id)).await?;
        let items = pages
            .iter()
            .filter_map(|raw| {
                let mut item = track_from_json(raw)?;
                if item.artist.is_empty() {
                    item.artist = album_artist.clone();
                }
                let disc = json_u32(raw, "disc_number");
                let number = json_u32(raw, "track_number");
                Some(item.in_collection(name.clone(), disc, number))
            })
            .collect();
        Ok(Collection::from_items(name, items))
    }

    pub async fn playlist(&self, id: &str) -> anyhow::Result<Collection> {
        let meta = self
            .tokens
            .authorized_get(
                &self.endpoint(&format!("playlists/{}", id)),
                &[("fields", "name".to_string())],
            )
            .await?;
        let name = meta
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or(id)
            .to_string();

        let entries = self.paginate(&format!("playlists/{}/tracks", id)).await?;
        let items = entries
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| {
                let track = entry.get("track").filter(|t| !t.is_null())?;
                let item = track_from_json(track)?;
                Some(item.in_collection(name.clone(), Some(1), Some(index as u32 + 1)))
            })
            .collect();
        Ok(Collection::from_items(name, items))
    }

    pub async fn artist_top_tracks(&self, id: &str) -> anyhow::Result<Vec<Item>> {
        let json = self
            .tokens
            .authorized_get(
                &self.endpoint(&format!("artists/{}/top-tracks", id)),
                &[("market", "US".to_string())],
            )
            .await?;
        Ok(json
            .get("tracks")
            .and_then(|t| t.as_array())
            .map(|tracks| tracks.iter().filter_map(track_from_json).collect())
            .unwrap_or_default())
    }

    /// Album ids of an artist, newest first, at most `limit`.
    pub async fn artist_album_ids(&self, id: &str, limit: usize) -> anyhow::Result<Vec<String>> {
        let json = self
            .tokens
            .authorized_get(
                &self.endpoint(&format!("artists/{}/albums", id)),
                &[
                    ("include_groups", "album,single".to_string()),
                    ("limit", limit.clamp(1, 50).to_string()),
                ],
            )
            .await?;
        Ok(json
            .get("items")
            .and_then(|v| v.as_array())
            .map(|albums| {
                albums
                    .iter()
                    .filter_map(|a| a.get("id").and_then(|v| v.as_str()).map(str::to_string))
                    .take(limit)
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Walks `limit`/`offset` pages until one is empty or `next` is null.
    async fn paginate(&self, path: &str) -> anyhow::Result<Vec<serde_json::Value>> {
        let url = self.endpoint(path);
        let mut offset: usize = 0;
        let mut all = Vec::new();

        loop {
            let page = self
                .tokens
                .authorized_get(
                    &url,
                    &[
                        ("limit", self.page_size.to_string()),
                        ("offset", offset.to_string()),
                    ],
                )
                .await?;

            let items = page
                .get("items")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();
            if items.is_empty() {
                break;
            }
            offset += items.len();
            all.extend(items);

            let has_next = page.get("next").is_some_and(|n| !n.is_null());
            if !has_next {
                break;
            }
            tracing::debug!("[spotify] {} page done, offset {}", path, offset);
        }

        Ok(all)
    }
}

fn json_u32(json: &serde_json::Value, key: &str) -> Option<u32> {
    json.get(key)
        .and_then(|v| v.as_u64())
        .and_then(|v| u32::try_from(v).ok())
}

fn first_artist(json: &serde_json::Value) -> String {
    json.get("artists")
        .and_then(|a| a.as_array())
        .and_then(|a| a.first())
        .and_then(|a| a.get("name"))
        .and_then(|n| n.as_str())
        .unwrap_or("")
        .to_string()
}

/// Maps a catalog track object onto an item without collection context.
pub fn track_from_json(json: &serde_json::Value) -> Option<Item> {
    let id = json.get("id").and_then(|v| v.as_str())?.to_string();
    let title = json
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let url = json
        .pointer("/external_urls/spotify")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| format!("https://open.spotify.com/track/{}", id));
    let duration = json
        .get("duration_ms")
        .and_then(|v| v.as_f64())
        .map(|ms| ms / 1000.0)
        .unwrap_or(0.0);

    Some(
        Item::new(id, title, url)
            .with_artist(first_artist(json))
            .with_duration(duration),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn track_mapping() {
        let raw = json!({
            "id": "4uLU6hMCjMI75M1A2tKUQC",
            "name": "Never Gonna Give You Up",
            "artists": [{"name": "Rick Astley"}, {"name": "Other"}],
            "duration_ms": 213573,
            "external_urls": {"spotify": "https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC"}
        });
        let item = track_from_json(&raw).unwrap();
        assert_eq!(item.artist, "Rick Astley");
        assert_eq!(item.display_name(), "Rick Astley - Never Gonna Give You Up");
        assert!((item.duration_seconds - 213.573).abs() < 1e-9);
        assert!(item.collection_name.is_none());
    }

    #[test]
    fn track_without_id_is_skipped() {
        assert!(track_from_json(&json!({"name": "local file"})).is_none());
    }

    #[test]
    fn unconfigured_catalog_has_no_client() {
        let settings = CatalogSettings::default();
        assert!(SpotifyClient::from_settings(reqwest::Client::new(), &settings, 50).is_none());
    }
}
