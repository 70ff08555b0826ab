use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::OnceCell;

use medialoader_core::models::media::{Collection, Item};

use crate::core::url_parser::{LinkClass, LinkKind, ParsedLink};
use crate::core::ytdlp::Extractor;
use crate::platforms::spotify::{web, SpotifyClient};
use crate::platforms::traits::Strategy;
use crate::platforms::Service;

/// Upper bound on extractor pages per collection; a backend that ignores the
/// page range would otherwise be listed forever.
const MAX_PAGES: u32 = 400;

/// Season/episode tokens in titles. Tried in order; the first match wins.
static GROUP_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\(S(\d{1,2})/E(\d{1,3})\)",
        r"(?i)\bS(\d{1,2})\s*E(\d{1,3})\b",
        r"(?i)\bStaffel\s*(\d{1,2})\D+?Folge\s*(\d{1,3})",
        r"(?i)\bSeason\s*(\d{1,2})\D+?Episode\s*(\d{1,3})",
        r"\b(\d{1,2})x(\d{1,3})\b",
        r"\(S(\d{1,2})\)",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// `(group, sequence)` parsed from a title.
pub fn parse_group_from_title(title: &str) -> Option<(u32, Option<u32>)> {
    GROUP_PATTERNS.iter().find_map(|re| {
        let caps = re.captures(title)?;
        let group = caps.get(1)?.as_str().parse().ok()?;
        let sequence = caps.get(2).and_then(|m| m.as_str().parse().ok());
        Some((group, sequence))
    })
}

/// Fills missing group numbers from titles. Items that still lack one are
/// placed in the default group by [`Collection::from_items`].
pub fn assign_groups(items: &mut [Item]) {
    for item in items.iter_mut().filter(|i| i.group_number.is_none()) {
        if let Some((group, sequence)) = parse_group_from_title(&item.title) {
            item.group_number = Some(group);
            if item.sequence_number.is_none() {
                item.sequence_number = sequence;
            }
        }
    }
}

/// Shared state for one artist expansion. The public page is fetched at
/// most once, on first use.
pub struct ArtistContext {
    pub link: ParsedLink,
    pub limit: usize,
    http: reqwest::Client,
    page: OnceCell<Option<String>>,
}

impl ArtistContext {
    pub fn new(link: ParsedLink, limit: usize, http: reqwest::Client) -> Self {
        Self {
            link,
            limit,
            http,
            page: OnceCell::new(),
        }
    }

    async fn page(&self) -> Option<&str> {
        self.page
            .get_or_init(|| async {
                match crate::core::scrape::fetch_html(&self.http, &self.link.url).await {
                    Ok(html) => Some(html),
                    Err(e) => {
                        tracing::warn!("[expander] artist page fetch failed: {}", e);
                        None
                    }
                }
            })
            .await
            .as_deref()
    }

    fn is_catalog(&self) -> bool {
        self.link.service == Service::Spotify
    }
}

struct TopTracksRung {
    client: Arc<SpotifyClient>,
}

#[async_trait]
impl Strategy<ArtistContext, Vec<Item>> for TopTracksRung {
    fn name(&self) -> &str {
        "top-tracks"
    }

    async fn attempt(&self, ctx: &ArtistContext) -> Option<Vec<Item>> {
        if !ctx.is_catalog() {
            return None;
        }
        match self.client.artist_top_tracks(&ctx.link.id).await {
            Ok(items) => Some(items),
            Err(e) => {
                tracing::warn!("[expander] top-tracks failed: {}", e);
                None
            }
        }
    }
}

struct ExtractorListingRung {
    extractor: Extractor,
}

#[async_trait]
impl Strategy<ArtistContext, Vec<Item>> for ExtractorListingRung {
    fn name(&self) -> &str {
        "extractor-listing"
    }

    async fn attempt(&self, ctx: &ArtistContext) -> Option<Vec<Item>> {
        if ctx.is_catalog() {
            return None;
        }
        let count = u32::try_from(ctx.limit).unwrap_or(u32::MAX).max(1);
        match self.extractor.playlist_page(&ctx.link.url, 1, count).await {
            Ok((_, items)) => Some(items),
            Err(e) => {
                tracing::warn!("[expander] extractor-listing failed: {}", e);
                None
            }
        }
    }
}

struct EmbeddedStateRung;

#[async_trait]
impl Strategy<ArtistContext, Vec<Item>> for EmbeddedStateRung {
    fn name(&self) -> &str {
        "embedded-state"
    }

    async fn attempt(&self, ctx: &ArtistContext) -> Option<Vec<Item>> {
        if !ctx.is_catalog() {
            return None;
        }
        let html = ctx.page().await?;
        let artist = crate::core::scrape::extract_item(html, &ctx.link.url)
            .map(|i| i.title)
            .unwrap_or_default();
        let states = crate::core::scrape::embedded_state(html);
        Some(web::tracks_from_state(&states, &artist))
    }
}

struct LinkedItemsRung;

#[async_trait]
impl Strategy<ArtistContext, Vec<Item>> for LinkedItemsRung {
    fn name(&self) -> &str {
        "linked-items"
    }

    async fn attempt(&self, ctx: &ArtistContext) -> Option<Vec<Item>> {
        if !ctx.is_catalog() {
            return None;
        }
        Some(web::linked_tracks(ctx.page().await?))
    }
}

struct SubCollectionRung {
    client: Option<Arc<SpotifyClient>>,
    max_sub_collections: usize,
}

#[async_trait]
impl Strategy<ArtistContext, Vec<Item>> for SubCollectionRung {
    fn name(&self) -> &str {
        "sub-collections"
    }

    async fn attempt(&self, ctx: &ArtistContext) -> Option<Vec<Item>> {
        if !ctx.is_catalog() {
            return None;
        }

        let mut album_ids = Vec::new();
        if let Some(client) = &self.client {
            match client.artist_album_ids(&ctx.link.id, self.max_sub_collections).await {
                Ok(ids) => album_ids = ids,
                Err(e) => tracing::warn!("[expander] album listing failed: {}", e),
            }
        }
        if album_ids.is_empty() {
            album_ids = web::linked_album_ids(ctx.page().await.unwrap_or_default());
        }
        album_ids.truncate(self.max_sub_collections);

        let mut items = Vec::new();
        for album_id in &album_ids {
            if items.len() >= ctx.limit {
                break;
            }
            let album_items = match &self.client {
                Some(client) => match client.album(album_id).await {
                    Ok(collection) => collection.into_items(),
                    Err(e) => {
                        tracing::warn!("[expander] album {} failed: {}", album_id, e);
                        Vec::new()
                    }
                },
                None => match web::fetch_page(&ctx.http, "album", album_id).await {
                    Ok(html) => web::items_from_page(&html, &web::page_url("album", album_id)).1,
                    Err(e) => {
                        tracing::warn!("[expander] album page {} failed: {}", album_id, e);
                        Vec::new()
                    }
                },
            };
            items.extend(album_items);
        }
        Some(items)
    }
}

pub struct CollectionExpander {
    extractor: Extractor,
    spotify: Option<Arc<SpotifyClient>>,
    http: reqwest::Client,
    page_size: u32,
    artist_ladder: Vec<Box<dyn Strategy<ArtistContext, Vec<Item>>>>,
}

impl CollectionExpander {
    pub fn new(
        extractor: Extractor,
        spotify: Option<Arc<SpotifyClient>>,
        http: reqwest::Client,
        page_size: u32,
        max_sub_collections: usize,
    ) -> Self {
        let mut artist_ladder: Vec<Box<dyn Strategy<ArtistContext, Vec<Item>>>> = Vec::new();
        if let Some(client) = &spotify {
            artist_ladder.push(Box::new(TopTracksRung {
                client: client.clone(),
            }));
        }
        artist_ladder.push(Box::new(ExtractorListingRung {
            extractor: extractor.clone(),
        }));
        artist_ladder.push(Box::new(EmbeddedStateRung));
        artist_ladder.push(Box::new(LinkedItemsRung));
        artist_ladder.push(Box::new(SubCollectionRung {
            client: spotify.clone(),
            max_sub_collections,
        }));

        Self {
            extractor,
            spotify,
            http,
            page_size: page_size.max(1),
            artist_ladder,
        }
    }

    /// Replaces the artist ladder, e.g. with stub rungs.
    pub fn with_artist_ladder(mut self, ladder: Vec<Box<dyn Strategy<ArtistContext, Vec<Item>>>>) -> Self {
        self.artist_ladder = ladder;
        self
    }

    /// Expands any recognized link: single items become a one-item collection.
    pub async fn expand(&self, link: &ParsedLink, limit: usize) -> anyhow::Result<Collection> {
        match link.kind.class() {
            LinkClass::Single => Ok(Collection::from_items(
                String::new(),
                vec![Item::new(link.id.clone(), "", link.url.clone())],
            )),
            LinkClass::ArtistOrChannel => {
                let items = self.expand_artist(link, limit).await;
                if items.is_empty() {
                    return Err(anyhow::anyhow!("Nothing found for {}", link.url));
                }
                // Artist-wide lists keep their ranking order.
                let name = items
                    .iter()
                    .find(|i| !i.artist.is_empty())
                    .map(|i| i.artist.clone())
                    .unwrap_or_else(|| link.id.clone());
                let items = items
                    .into_iter()
                    .map(|mut i| {
                        i.group_number = None;
                        i.sequence_number = None;
                        i.collection_name = None;
                        i
                    })
                    .collect();
                Ok(Collection::from_items(name, items))
            }
            LinkClass::Collection => self.expand_collection(link).await,
        }
    }

    async fn expand_collection(&self, link: &ParsedLink) -> anyhow::Result<Collection> {
        if link.service == Service::Spotify {
            return self.expand_catalog_collection(link).await;
        }

        let (name, mut items) = self.list_all(&link.url).await?;
        assign_groups(&mut items);
        let collection = Collection::from_items(name, items);
        tracing::info!(
            "[expander] {} expanded to {} items in {} groups",
            link.url,
            collection.len(),
            collection.groups.len()
        );
        Ok(collection)
    }

    async fn expand_catalog_collection(&self, link: &ParsedLink) -> anyhow::Result<Collection> {
        if let Some(client) = &self.spotify {
            let result = match link.kind {
                LinkKind::Album => client.album(&link.id).await,
                _ => client.playlist(&link.id).await,
            };
            match result {
                Ok(collection) if !collection.is_empty() => return Ok(collection),
                Ok(_) => tracing::warn!("[expander] catalog returned an empty collection"),
                Err(e) => tracing::warn!("[expander] catalog expansion failed: {}", e),
            }
        }

        let kind = if link.kind == LinkKind::Album { "album" } else { "playlist" };
        let html = web::fetch_page(&self.http, kind, &link.id).await?;
        let (name, items) = web::items_from_page(&html, &link.url);
        let name = if name.is_empty() { link.id.clone() } else { name };
        let items = items
            .into_iter()
            .enumerate()
            .map(|(i, item)| {
                let sequence = Some(i as u32 + 1);
                item.in_collection(name.clone(), Some(1), sequence)
            })
            .collect();
        Ok(Collection::from_items(name, items))
    }

    /// Flat-lists a collection page by page until a page is empty, short, or
    /// brings nothing new.
    pub async fn list_all(&self, url: &str) -> anyhow::Result<(String, Vec<Item>)> {
        let mut seen = HashSet::new();
        let mut name = String::new();
        let mut items = Vec::new();
        let mut start = 1u32;

        for _ in 0..MAX_PAGES {
            let (title, page) = self.extractor.playlist_page(url, start, self.page_size).await?;
            if name.is_empty() {
                name = title;
            }
            let page_len = page.len();
            if page_len == 0 {
                break;
            }

            let before = items.len();
            items.extend(page.into_iter().filter(|i| seen.insert(i.id.clone())));
            tracing::debug!("[expander] page at {} -> {} items", start, page_len);

            if page_len < self.page_size as usize || items.len() == before {
                break;
            }
            start += self.page_size;
        }

        Ok((name, items))
    }

    /// Runs the artist ladder in order, accumulating distinct items until
    /// `limit` is reached or the ladder is exhausted.
    pub async fn expand_artist(&self, link: &ParsedLink, limit: usize) -> Vec<Item> {
        let ctx = ArtistContext::new(link.clone(), limit, self.http.clone());
        let mut seen = HashSet::new();
        let mut items = Vec::new();

        for rung in &self.artist_ladder {
            if items.len() >= limit {
                break;
            }
            match rung.attempt(&ctx).await {
                Some(found) => {
                    let before = items.len();
                    items.extend(found.into_iter().filter(|i| seen.insert(i.id.clone())));
                    tracing::debug!("[expander] rung '{}' added {}", rung.name(), items.len() - before);
                }
                None => tracing::debug!("[expander] rung '{}' not applicable", rung.name()),
            }
        }

        items.truncate(limit);
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_tokens_first_match_wins() {
        assert_eq!(parse_group_from_title("Tatort (S12/E04)"), Some((12, Some(4))));
        assert_eq!(parse_group_from_title("Dark S02E07 - Lost"), Some((2, Some(7))));
        assert_eq!(parse_group_from_title("Staffel 3, Folge 10: Finale"), Some((3, Some(10))));
        assert_eq!(parse_group_from_title("Season 1 Episode 2"), Some((1, Some(2))));
        assert_eq!(parse_group_from_title("Show 4x12"), Some((4, Some(12))));
        assert_eq!(parse_group_from_title("Special (S05)"), Some((5, None)));
        assert_eq!(parse_group_from_title("A movie"), None);
        // Both tokens present: the earlier pattern decides.
        assert_eq!(parse_group_from_title("(S01/E02) aka S03E04"), Some((1, Some(2))));
    }

    #[test]
    fn assign_prefers_native_groups() {
        let mut items = vec![
            Item::new("a", "S02E01", "u").in_collection("Show", Some(7), Some(1)),
            Item::new("b", "S02E03", "u"),
            Item::new("c", "Trailer", "u"),
        ];
        assign_groups(&mut items);
        assert_eq!(items[0].group_number, Some(7));
        assert_eq!((items[1].group_number, items[1].sequence_number), (Some(2), Some(3)));
        assert_eq!(items[2].group_number, None);

        let collection = Collection::from_items("Show", items);
        assert_eq!(collection.groups.keys().copied().collect::<Vec<_>>(), vec![1, 2, 7]);
    }

    struct FixedRung(&'static str, Vec<&'static str>);

    #[async_trait]
    impl Strategy<ArtistContext, Vec<Item>> for FixedRung {
        fn name(&self) -> &str {
            self.0
        }

        async fn attempt(&self, _ctx: &ArtistContext) -> Option<Vec<Item>> {
            Some(self.1.iter().map(|id| Item::new(*id, *id, "u")).collect())
        }
    }

    fn artist_link() -> ParsedLink {
        crate::core::url_parser::resolve("https://open.spotify.com/artist/0gxyHStUsqpMadRV0Di1Qt").unwrap()
    }

    #[tokio::test]
    async fn ladder_accumulates_until_limit() {
        let expander = CollectionExpander::new(Extractor::new("yt-dlp"), None, reqwest::Client::new(), 50, 5)
            .with_artist_ladder(vec![
                Box::new(FixedRung("one", vec!["a", "b"])),
                Box::new(FixedRung("two", vec!["b", "c", "d"])),
                Box::new(FixedRung("three", vec!["e"])),
            ]);

        let items = expander.expand_artist(&artist_link(), 3).await;
        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        let items = expander.expand_artist(&artist_link(), 10).await;
        assert_eq!(items.len(), 5);
    }
}
