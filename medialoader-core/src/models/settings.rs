use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    pub schema_version: u32,
    #[serde(default)]
    pub download: DownloadSettings,
    #[serde(default)]
    pub catalog: CatalogSettings,
    #[serde(default)]
    pub advanced: AdvancedSettings,
    #[serde(default)]
    pub proxy: ProxySettings,
    #[serde(default)]
    pub extractor_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadSettings {
    #[serde(default = "default_output_dir")]
    pub default_output_dir: PathBuf,
    #[serde(default = "default_video_quality")]
    pub video_quality: String,
    #[serde(default = "default_audio_format")]
    pub audio_format: String,
    #[serde(default = "default_true")]
    pub skip_existing: bool,
    #[serde(default)]
    pub download_subtitles: bool,
    #[serde(default)]
    pub download_thumbnail: bool,
    #[serde(default)]
    pub download_description: bool,
    #[serde(default = "default_true")]
    pub embed_metadata: bool,
    #[serde(default)]
    pub rate_limit: Option<String>,
    #[serde(default)]
    pub extra_ytdlp_flags: Vec<String>,
}

/// Client credentials for the music catalog API. Empty means "not configured".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSettings {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
}

impl CatalogSettings {
    pub fn is_configured(&self) -> bool {
        !self.client_id.trim().is_empty() && !self.client_secret.trim().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvancedSettings {
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_max_sub_collections")]
    pub max_sub_collections: usize,
    #[serde(default = "default_cancel_poll_ms")]
    pub cancel_poll_ms: u64,
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,
    #[serde(default = "default_min_partial_bytes")]
    pub min_partial_bytes: u64,
    #[serde(default = "default_recent_partial_secs")]
    pub recent_partial_secs: u64,
    #[serde(default = "default_error_tail_lines")]
    pub error_tail_lines: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProxySettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_proxy_type")]
    pub proxy_type: String,
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_proxy_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

fn default_output_dir() -> PathBuf {
    dirs::download_dir().unwrap_or_else(|| PathBuf::from("."))
}

fn default_video_quality() -> String {
    "best".into()
}

fn default_audio_format() -> String {
    "mp3".into()
}

fn default_true() -> bool {
    true
}

fn default_api_base() -> String {
    "https://api.spotify.com/v1".into()
}

fn default_token_url() -> String {
    "https://accounts.spotify.com/api/token".into()
}

fn default_page_size() -> u32 {
    50
}

fn default_max_sub_collections() -> usize {
    5
}

fn default_cancel_poll_ms() -> u64 {
    200
}

fn default_kill_grace_ms() -> u64 {
    300
}

fn default_min_partial_bytes() -> u64 {
    1024
}

fn default_recent_partial_secs() -> u64 {
    5
}

fn default_error_tail_lines() -> usize {
    5
}

fn default_proxy_type() -> String {
    "http".into()
}

fn default_proxy_port() -> u16 {
    8080
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            default_output_dir: default_output_dir(),
            video_quality: default_video_quality(),
            audio_format: default_audio_format(),
            skip_existing: true,
            download_subtitles: false,
            download_thumbnail: false,
            download_description: false,
            embed_metadata: true,
            rate_limit: None,
            extra_ytdlp_flags: Vec::new(),
        }
    }
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            api_base: default_api_base(),
            token_url: default_token_url(),
        }
    }
}

impl Default for AdvancedSettings {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_sub_collections: default_max_sub_collections(),
            cancel_poll_ms: default_cancel_poll_ms(),
            kill_grace_ms: default_kill_grace_ms(),
            min_partial_bytes: default_min_partial_bytes(),
            recent_partial_secs: default_recent_partial_secs(),
            error_tail_lines: default_error_tail_lines(),
        }
    }
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            schema_version: 1,
            download: DownloadSettings::default(),
            catalog: CatalogSettings::default(),
            advanced: AdvancedSettings::default(),
            proxy: ProxySettings::default(),
            extractor_path: None,
        }
    }
}
