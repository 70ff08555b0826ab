use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use medialoader_core::fs_paths::DesktopPaths;
use medialoader_core::models::download::ResultLog;
use medialoader_core::models::settings::AppSettings;

pub mod commands;
pub mod core;
pub mod platforms;
pub mod storage;

pub use medialoader_core::models;

use crate::core::engine::{DownloadEngine, EngineConfig};
use crate::core::expander::CollectionExpander;
use crate::core::fallback::FallbackChain;
use crate::core::metadata::MetadataFetcher;
use crate::core::ytdlp::Extractor;
use crate::platforms::spotify::SpotifyClient;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct AppState {
    pub settings: AppSettings,
    pub http: reqwest::Client,
    pub spotify: Option<Arc<SpotifyClient>>,
    pub engine: DownloadEngine,
    pub fetcher: MetadataFetcher,
    pub expander: CollectionExpander,
    pub fallback: FallbackChain,
    pub results: tokio::sync::Mutex<ResultLog>,
}

impl AppState {
    /// Wires every component from settings and an already located extractor.
    pub fn build(settings: AppSettings, extractor: Extractor) -> anyhow::Result<Self> {
        let http = core::http_client::build_client(HTTP_TIMEOUT, &settings.proxy)?;

        let spotify = SpotifyClient::from_settings(http.clone(), &settings.catalog, settings.advanced.page_size)
            .map(Arc::new);
        if spotify.is_none() {
            tracing::debug!("Catalog credentials not configured, API strategies disabled");
        }

        let extractor = match core::http_client::proxy_url(&settings.proxy) {
            Some(proxy) => {
                let mut args = extractor.extra_args.clone();
                args.extend(["--proxy".to_string(), proxy]);
                extractor.with_args(args)
            }
            None => extractor,
        };

        let engine = DownloadEngine::new(
            extractor.clone(),
            EngineConfig::from_settings(&settings.advanced, None),
        );
        let fetcher = MetadataFetcher::standard(spotify.clone(), extractor.clone(), http.clone());
        let expander = CollectionExpander::new(
            extractor,
            spotify.clone(),
            http.clone(),
            settings.advanced.page_size,
            settings.advanced.max_sub_collections,
        );
        let fallback = FallbackChain::new()
            .with(Box::new(platforms::youtube::search_backend(engine.clone())))
            .with(Box::new(platforms::soundcloud::search_backend(engine.clone())));

        Ok(Self {
            settings,
            http,
            spotify,
            engine,
            fetcher,
            expander,
            fallback,
            results: tokio::sync::Mutex::new(ResultLog::new()),
        })
    }

    pub async fn initialize(settings: AppSettings) -> anyhow::Result<Self> {
        let path = core::ytdlp::find_ytdlp(settings.extractor_path.as_deref())
            .await
            .ok_or_else(|| anyhow::anyhow!("yt-dlp not found on PATH or in the managed bin directory"))?;
        tracing::debug!("Using extractor {:?}", path);
        Self::build(settings, Extractor::new(path))
    }
}

#[derive(Parser)]
#[command(name = "medialoader", version, about = "Resolve music and video links into media files")]
struct Cli {
    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Classify a URL without touching the network
    Resolve { url: String },
    /// Print item metadata as JSON
    Info { url: String },
    /// Download a single item or a whole collection
    Download(DownloadArgs),
    /// Search the primary media host
    Search {
        query: String,
        #[arg(long, default_value_t = 5)]
        limit: u32,
        /// Search the secondary host instead
        #[arg(long)]
        soundcloud: bool,
    },
}

#[derive(Args, Debug, Clone)]
pub struct DownloadArgs {
    pub url: String,
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    #[arg(short, long)]
    pub quality: Option<String>,
    #[arg(short, long)]
    pub format: Option<String>,
    #[arg(long)]
    pub audio: bool,
    /// Include the whole collection when the link points into one
    #[arg(long)]
    pub collection: bool,
    #[arg(long)]
    pub subs: bool,
    #[arg(long)]
    pub thumbnail: bool,
    #[arg(long)]
    pub description: bool,
    #[arg(long)]
    pub limit_rate: Option<String>,
    #[arg(long)]
    pub cookies: Option<PathBuf>,
    /// Maximum number of items for artist or channel links
    #[arg(long, default_value_t = 50)]
    pub max_items: usize,
    #[arg(long, conflicts_with = "series")]
    pub movie: bool,
    #[arg(long)]
    pub series: bool,
    /// Download again even if the file already exists
    #[arg(long)]
    pub force: bool,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "medialoader=debug,medialoader_lib=debug" } else { "medialoader=info,medialoader_lib=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let settings = storage::config::load_settings(&DesktopPaths);

    match cli.command {
        Command::Resolve { url } => commands::resolve::resolve_url(&url),
        Command::Info { url } => {
            let state = AppState::initialize(settings).await?;
            commands::info::print_info(&state, &url).await
        }
        Command::Download(args) => {
            let state = AppState::initialize(settings).await?;
            commands::download::download(&state, args).await
        }
        Command::Search { query, limit, soundcloud } => {
            let state = AppState::initialize(settings).await?;
            commands::search::search(&state, &query, limit, soundcloud).await
        }
    }
}
