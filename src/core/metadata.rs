use std::sync::Arc;

use async_trait::async_trait;

use medialoader_core::models::media::Item;

use crate::core::registry::StrategyChain;
use crate::core::scrape;
use crate::core::url_parser::{self, LinkKind, ParsedLink};
use crate::core::ytdlp::{self, Extractor};
use crate::platforms::spotify::SpotifyClient;
use crate::platforms::traits::Strategy;
use crate::platforms::Service;

/// What a metadata lookup is about: the raw URL and, if recognized, its
/// classification.
#[derive(Debug, Clone)]
pub struct LookupTarget {
    pub url: String,
    pub link: Option<ParsedLink>,
}

impl LookupTarget {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.trim().to_string(),
            link: url_parser::resolve(url),
        }
    }
}

/// Typed catalog endpoint. Applies to catalog track links when credentials
/// are configured.
pub struct ApiStrategy {
    client: Arc<SpotifyClient>,
}

impl ApiStrategy {
    pub fn new(client: Arc<SpotifyClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Strategy<LookupTarget, Item> for ApiStrategy {
    fn name(&self) -> &str {
        "catalog-api"
    }

    async fn attempt(&self, ctx: &LookupTarget) -> Option<Item> {
        let link = ctx.link.as_ref()?;
        if link.service != Service::Spotify || link.kind != LinkKind::Track {
            return None;
        }
        match self.client.track(&link.id).await {
            Ok(item) => Some(item),
            Err(e) => {
                tracing::warn!("[metadata] catalog-api failed for {}: {}", link.id, e);
                None
            }
        }
    }
}

/// Structured-info mode of the extraction tool.
pub struct ExtractorStrategy {
    extractor: Extractor,
}

impl ExtractorStrategy {
    pub fn new(extractor: Extractor) -> Self {
        Self { extractor }
    }
}

#[async_trait]
impl Strategy<LookupTarget, Item> for ExtractorStrategy {
    fn name(&self) -> &str {
        "extractor"
    }

    async fn attempt(&self, ctx: &LookupTarget) -> Option<Item> {
        let json = match self.extractor.video_info(&ctx.url).await {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!("[metadata] extractor failed for {}: {}", ctx.url, e);
                return None;
            }
        };
        let item = ytdlp::item_from_json(&json, &ctx.url)?;
        (!item.needs_metadata()).then_some(item)
    }
}

/// Raw page fetch plus pattern extraction.
pub struct ScrapeStrategy {
    client: reqwest::Client,
}

impl ScrapeStrategy {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Strategy<LookupTarget, Item> for ScrapeStrategy {
    fn name(&self) -> &str {
        "scrape"
    }

    async fn attempt(&self, ctx: &LookupTarget) -> Option<Item> {
        let html = match scrape::fetch_html(&self.client, &ctx.url).await {
            Ok(html) => html,
            Err(e) => {
                tracing::warn!("[metadata] scrape failed for {}: {}", ctx.url, e);
                return None;
            }
        };
        scrape::extract_item(&html, &ctx.url)
    }
}

pub struct MetadataFetcher {
    chain: StrategyChain<LookupTarget, Item>,
}

impl MetadataFetcher {
    pub fn new(chain: StrategyChain<LookupTarget, Item>) -> Self {
        Self { chain }
    }

    /// API (when configured), then extractor, then scraping.
    pub fn standard(spotify: Option<Arc<SpotifyClient>>, extractor: Extractor, http: reqwest::Client) -> Self {
        let mut chain = StrategyChain::new();
        if let Some(client) = spotify {
            chain.register(Box::new(ApiStrategy::new(client)));
        }
        chain.register(Box::new(ExtractorStrategy::new(extractor)));
        chain.register(Box::new(ScrapeStrategy::new(http)));
        Self::new(chain)
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.chain.names()
    }

    /// `None` means "item not found" once every strategy is exhausted.
    pub async fn fetch(&self, url: &str) -> Option<Item> {
        let target = LookupTarget::new(url);
        match self.chain.first_success(&target).await {
            Some((strategy, item)) => {
                tracing::debug!("[metadata] {} resolved via {}", url, strategy);
                Some(item)
            }
            None => {
                tracing::info!("[metadata] item not found: {}", url);
                None
            }
        }
    }

    /// Fills in an item discovered without metadata, keeping its collection
    /// placement.
    pub async fn complete(&self, item: Item) -> Item {
        if !item.needs_metadata() {
            return item;
        }
        match self.fetch(&item.origin_url).await {
            Some(mut fetched) => {
                fetched.id = item.id;
                fetched.origin_url = item.origin_url;
                if item.collection_name.is_some() {
                    fetched.collection_name = item.collection_name;
                    fetched.group_number = item.group_number;
                    fetched.sequence_number = item.sequence_number;
                }
                fetched
            }
            None => item,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Stub {
        name: &'static str,
        title: Option<&'static str>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Strategy<LookupTarget, Item> for Stub {
        fn name(&self) -> &str {
            self.name
        }

        async fn attempt(&self, ctx: &LookupTarget) -> Option<Item> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.title.map(|t| Item::new("id", t, ctx.url.clone()))
        }
    }

    #[tokio::test]
    async fn falls_through_to_later_strategy() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = MetadataFetcher::new(
            StrategyChain::new()
                .with(Box::new(Stub { name: "none", title: None, calls: calls.clone() }))
                .with(Box::new(Stub { name: "some", title: Some("Found"), calls: calls.clone() })),
        );
        let item = fetcher.fetch("https://example.org/x").await.unwrap();
        assert_eq!(item.title, "Found");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausted_chain_is_not_found() {
        let fetcher = MetadataFetcher::new(StrategyChain::new().with(Box::new(Stub {
            name: "none",
            title: None,
            calls: Arc::new(AtomicUsize::new(0)),
        })));
        assert!(fetcher.fetch("https://example.org/x").await.is_none());
    }

    #[tokio::test]
    async fn complete_keeps_collection_placement() {
        let fetcher = MetadataFetcher::new(StrategyChain::new().with(Box::new(Stub {
            name: "some",
            title: Some("Real Title"),
            calls: Arc::new(AtomicUsize::new(0)),
        })));
        let bare = Item::new("abc", "", "https://open.spotify.com/track/abc")
            .in_collection("Album", Some(2), Some(5));
        let item = fetcher.complete(bare).await;
        assert_eq!(item.title, "Real Title");
        assert_eq!(item.id, "abc");
        assert_eq!((item.group_number, item.sequence_number), (Some(2), Some(5)));
    }

    #[test]
    fn standard_chain_without_credentials() {
        let fetcher = MetadataFetcher::standard(None, Extractor::new("yt-dlp"), reqwest::Client::new());
        assert_eq!(fetcher.strategy_names(), vec!["extractor", "scrape"]);
    }
}
