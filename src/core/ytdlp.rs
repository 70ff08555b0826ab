use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;

use anyhow::anyhow;
use regex::Regex;

use medialoader_core::fs_paths::{AppPaths, DesktopPaths};
use medialoader_core::models::download::DownloadTask;
use medialoader_core::models::media::Item;

use crate::core::process;

fn bin_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "yt-dlp.exe"
    } else {
        "yt-dlp"
    }
}

pub async fn find_ytdlp(configured: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = configured {
        if path.exists() {
            return Some(path.to_path_buf());
        }
        tracing::warn!("Configured extractor {:?} does not exist", path);
    }

    if let Ok(output) = process::command(bin_name())
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
    {
        if output.success() {
            return Some(PathBuf::from(bin_name()));
        }
    }

    let managed = DesktopPaths.bin_dir()?.join(bin_name());
    if managed.exists() {
        return Some(managed);
    }

    None
}

/// Handle on the external extraction tool plus arguments shared by every
/// invocation (proxy, user flags).
#[derive(Debug, Clone)]
pub struct Extractor {
    pub path: PathBuf,
    pub extra_args: Vec<String>,
}

impl Extractor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            extra_args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    pub async fn video_info(&self, url: &str) -> anyhow::Result<serde_json::Value> {
        get_video_info(&self.path, url, &self.extra_args).await
    }

    pub async fn playlist_page(
        &self,
        url: &str,
        start: u32,
        count: u32,
    ) -> anyhow::Result<(String, Vec<Item>)> {
        get_playlist_page(&self.path, url, start, count, &self.extra_args).await
    }

    pub async fn search(&self, prefix: &str, query: &str, max: u32) -> anyhow::Result<Vec<Item>> {
        search(&self.path, prefix, query, max, &self.extra_args).await
    }
}

/// Structured-info mode. Collection-like URLs may emit one record per line;
/// only the first well-formed record is returned.
pub async fn get_video_info(
    ytdlp: &Path,
    url: &str,
    extra: &[String],
) -> anyhow::Result<serde_json::Value> {
    let output = process::command(ytdlp)
        .args(["--dump-json", "--no-warnings", "--no-playlist"])
        .args(extra)
        .arg(url)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| anyhow!("Failed to run extractor: {}", e))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if let Some(record) = first_json_record(&stdout) {
        return Ok(record);
    }

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("Extractor failed: {}", stderr.trim()));
    }
    Err(anyhow!("Extractor returned no JSON record"))
}

pub fn first_json_record(stdout: &str) -> Option<serde_json::Value> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with('{'))
        .find_map(|l| serde_json::from_str::<serde_json::Value>(l).ok())
        .filter(|v| v.is_object())
}

/// Flat listing of entries `start..start+count` (1-based) of a collection.
pub async fn get_playlist_page(
    ytdlp: &Path,
    url: &str,
    start: u32,
    count: u32,
    extra: &[String],
) -> anyhow::Result<(String, Vec<Item>)> {
    let end = start + count.saturating_sub(1);
    let output = process::command(ytdlp)
        .args(["--flat-playlist", "--dump-json", "--no-warnings", "--yes-playlist"])
        .args(["--playlist-start", &start.to_string(), "--playlist-end", &end.to_string()])
        .args(extra)
        .arg(url)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| anyhow!("Failed to run extractor: {}", e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("Extractor playlist listing failed: {}", stderr.trim()));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(parse_flat_listing(&stdout, url))
}

pub fn parse_flat_listing(stdout: &str, url: &str) -> (String, Vec<Item>) {
    let mut title = String::new();
    let mut items = Vec::new();

    for line in stdout.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let Ok(json) = serde_json::from_str::<serde_json::Value>(line) else {
            continue;
        };
        if title.is_empty() {
            title = json
                .get("playlist_title")
                .or_else(|| json.get("playlist"))
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
        }
        if let Some(item) = item_from_json(&json, url) {
            items.push(item);
        }
    }

    (title, items)
}

pub async fn search(
    ytdlp: &Path,
    prefix: &str,
    query: &str,
    max: u32,
    extra: &[String],
) -> anyhow::Result<Vec<Item>> {
    let n = max.clamp(1, 20);
    let search_query = format!("{}{}:{}", prefix, n, query);

    let output = process::command(ytdlp)
        .args(["--flat-playlist", "--dump-json", "--no-warnings", "--socket-timeout", "15"])
        .args(extra)
        .arg(&search_query)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| anyhow!("Failed to run extractor: {}", e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("Search failed: {}", stderr.trim()));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(parse_flat_listing(&stdout, "").1)
}

fn str_field<'a>(json: &'a serde_json::Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| json.get(*k).and_then(|v| v.as_str()))
        .filter(|s| !s.trim().is_empty())
}

fn u32_field(json: &serde_json::Value, keys: &[&str]) -> Option<u32> {
    keys.iter()
        .find_map(|k| json.get(*k).and_then(|v| v.as_u64()))
        .and_then(|v| u32::try_from(v).ok())
}

/// Maps one extractor record onto an item. Records without an id are skipped.
pub fn item_from_json(json: &serde_json::Value, fallback_url: &str) -> Option<Item> {
    let id = str_field(json, &["id"])?.to_string();
    let title = str_field(json, &["track", "title", "fulltitle"]).unwrap_or("").to_string();
    let artist = str_field(json, &["artist", "creator", "uploader", "channel", "uploader_id"])
        .unwrap_or("")
        .to_string();
    let origin_url = str_field(json, &["webpage_url", "url"])
        .map(str::to_string)
        .unwrap_or_else(|| fallback_url.to_string());
    let duration = json.get("duration").and_then(|v| v.as_f64()).unwrap_or(0.0);

    let mut item = Item::new(id, title, origin_url)
        .with_artist(artist)
        .with_duration(duration);

    if let Some(series) = str_field(json, &["series"]) {
        item.collection_name = Some(series.to_string());
        item.group_number = u32_field(json, &["season_number"]);
        item.sequence_number = u32_field(json, &["episode_number"]);
    } else if let Some(album) = str_field(json, &["album"]) {
        item.collection_name = Some(album.to_string());
        item.group_number = u32_field(json, &["disc_number"]);
        item.sequence_number = u32_field(json, &["track_number"]);
    } else if let Some(playlist) = str_field(json, &["playlist_title", "playlist"]) {
        item.collection_name = Some(playlist.to_string());
        item.sequence_number = u32_field(json, &["playlist_index"]);
    }

    item.description = str_field(json, &["description"]).map(str::to_string);
    Some(item)
}

/// Parses `"<N>p"` into a height bound. `best`/`worst` have no bound.
pub fn quality_height(quality: &str) -> Option<u32> {
    let s = quality.trim().to_lowercase();
    s.strip_suffix('p')?.parse::<u32>().ok().filter(|h| *h > 0)
}

pub fn format_selector(quality: &str, audio_only: bool) -> String {
    let q = quality.trim().to_lowercase();
    if audio_only {
        return if q == "worst" { "wa/w".into() } else { "ba/b".into() };
    }
    match q.as_str() {
        "worst" => "wv*+wa/w".to_string(),
        _ => match quality_height(&q) {
            Some(h) => format!("bv*[height<={}]+ba/b[height<={}]/bv*+ba/b", h, h),
            None => "bv*+ba/b".to_string(),
        },
    }
}

pub struct DownloadInvocation<'a> {
    pub task: &'a DownloadTask,
    pub output_template: String,
    pub cookie_file: Option<&'a Path>,
    pub proxy: Option<String>,
}

pub fn build_download_args(inv: &DownloadInvocation<'_>) -> Vec<String> {
    let task = inv.task;
    let opts = &task.options;
    let mut args: Vec<String> = vec!["-f".into(), format_selector(&task.quality, task.audio_only)];

    if task.audio_only {
        args.push("-x".into());
        args.push("--audio-format".into());
        args.push(task.format.clone().unwrap_or_else(|| "mp3".into()));
        args.push("--audio-quality".into());
        args.push("0".into());
    } else if let Some(container) = &task.format {
        args.push("--merge-output-format".into());
        args.push(container.clone());
    }

    args.push(if opts.whole_collection { "--yes-playlist" } else { "--no-playlist" }.into());

    if opts.subtitles {
        args.extend(["--write-subs".into(), "--sub-langs".into(), "all".into()]);
        if !task.audio_only {
            args.push("--embed-subs".into());
        }
    }
    if opts.thumbnail {
        args.push("--write-thumbnail".into());
    }
    args.push(if opts.resume { "--continue" } else { "--no-continue" }.into());
    if let Some(rate) = opts.rate_limit.as_ref().filter(|r| !r.trim().is_empty()) {
        args.push("--limit-rate".into());
        args.push(rate.trim().to_string());
    }
    if opts.embed_metadata {
        args.push("--embed-metadata".into());
    }
    if let Some(cookies) = inv.cookie_file {
        args.push("--cookies".into());
        args.push(cookies.to_string_lossy().to_string());
    }
    if let Some(proxy) = &inv.proxy {
        args.push("--proxy".into());
        args.push(proxy.clone());
    }

    args.extend(opts.extra_flags.iter().cloned());
    args.extend([
        "--newline".into(),
        "--no-colors".into(),
        "--progress-template".into(),
        "download:%(progress._percent_str)s".into(),
        "-o".into(),
        inv.output_template.clone(),
        task.item.origin_url.clone(),
    ]);
    args
}

static PERCENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,3}(?:\.\d+)?)\s*%").unwrap());

/// Extracts a completion percentage from a progress line.
pub fn parse_progress_line(line: &str) -> Option<f64> {
    let line = line.trim();
    let is_progress = line.starts_with("[download]") || line.starts_with("download:");
    if !is_progress {
        return None;
    }
    let caps = PERCENT_RE.captures(line)?;
    let pct = caps[1].parse::<f64>().ok()?;
    (0.0..=100.0).contains(&pct).then_some(pct)
}

static DOWNLOAD_DEST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[download\] Destination: (.+)$").unwrap());
static ALREADY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[download\] (.+) has already been downloaded").unwrap());
static EXTRACT_DEST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[ExtractAudio\] Destination: (.+)$").unwrap());
static MERGE_DEST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\[Merger\] Merging formats into "(.+)"$"#).unwrap());

/// Remembers the file paths announced in extractor output.
#[derive(Debug, Default)]
pub struct OutputTracker {
    downloaded: Option<PathBuf>,
    extracted: Option<PathBuf>,
    merged: Option<PathBuf>,
}

impl OutputTracker {
    pub fn observe(&mut self, line: &str) {
        let line = line.trim();
        if let Some(c) = MERGE_DEST_RE.captures(line) {
            self.merged = Some(PathBuf::from(&c[1]));
        } else if let Some(c) = EXTRACT_DEST_RE.captures(line) {
            self.extracted = Some(PathBuf::from(&c[1]));
        } else if let Some(c) = DOWNLOAD_DEST_RE.captures(line) {
            self.downloaded = Some(PathBuf::from(&c[1]));
        } else if let Some(c) = ALREADY_RE.captures(line) {
            self.downloaded = Some(PathBuf::from(&c[1]));
        }
    }

    /// Final file in priority order merge > audio extraction > download,
    /// skipping announced paths that no longer exist.
    pub fn produced_file(&self) -> Option<PathBuf> {
        [&self.merged, &self.extracted, &self.downloaded]
            .into_iter()
            .flatten()
            .find(|p| p.is_file())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn progress_from_template_and_default_lines() {
        assert_eq!(parse_progress_line("download: 42.5%"), Some(42.5));
        assert_eq!(
            parse_progress_line("[download]  12.0% of ~  3.20MiB at  1.2MiB/s ETA 00:02"),
            Some(12.0)
        );
        assert_eq!(parse_progress_line("[download] 100% of 3.20MiB"), Some(100.0));
        assert_eq!(parse_progress_line("[ExtractAudio] Destination: a.mp3"), None);
        assert_eq!(parse_progress_line("[info] 50% of nothing"), None);
    }

    #[test]
    fn selectors_for_quality_tokens() {
        assert_eq!(format_selector("best", false), "bv*+ba/b");
        assert_eq!(format_selector("worst", false), "wv*+wa/w");
        assert_eq!(
            format_selector("720p", false),
            "bv*[height<=720]+ba/b[height<=720]/bv*+ba/b"
        );
        assert_eq!(format_selector("best", true), "ba/b");
        assert_eq!(quality_height("1080P"), Some(1080));
        assert_eq!(quality_height("0p"), None);
        assert_eq!(quality_height("hd"), None);
    }

    #[test]
    fn first_record_wins() {
        let out = "WARNING: something\n{\"id\": \"a\"}\n{\"id\": \"b\"}\n";
        assert_eq!(first_json_record(out).unwrap()["id"], "a");
        assert!(first_json_record("no json here").is_none());
        assert_eq!(first_json_record("{broken\n{\"id\":\"c\"}").unwrap()["id"], "c");
    }

    #[test]
    fn item_mapping_for_music_and_series() {
        let track = json!({
            "id": "abc", "title": "Video title", "track": "Song", "artist": "Band",
            "duration": 215.0, "webpage_url": "https://youtube.com/watch?v=abc",
            "album": "Record", "track_number": 3
        });
        let item = item_from_json(&track, "fallback").unwrap();
        assert_eq!(item.title, "Song");
        assert_eq!(item.artist, "Band");
        assert_eq!(item.duration_seconds, 215.0);
        assert_eq!(item.collection_name.as_deref(), Some("Record"));
        assert_eq!(item.sequence_number, Some(3));

        let episode = json!({
            "id": "e1", "title": "Folge 4", "uploader": "ZDF", "series": "SOKO",
            "season_number": 2, "episode_number": 4
        });
        let item = item_from_json(&episode, "https://zdf.de/x.html").unwrap();
        assert_eq!(item.origin_url, "https://zdf.de/x.html");
        assert_eq!((item.group_number, item.sequence_number), (Some(2), Some(4)));

        assert!(item_from_json(&json!({"title": "no id"}), "u").is_none());
    }

    #[test]
    fn download_args_map_options() {
        let mut task = DownloadTask::new(Item::new("1", "Song", "https://example.com/v")).audio("mp3");
        task.options.thumbnail = true;
        task.options.rate_limit = Some("1M".into());
        task.options.resume = false;

        let args = build_download_args(&DownloadInvocation {
            task: &task,
            output_template: "/out/Song.%(ext)s".into(),
            cookie_file: Some(Path::new("/tmp/c.txt")),
            proxy: None,
        });

        let joined = args.join(" ");
        assert!(joined.starts_with("-f ba/b -x --audio-format mp3"));
        assert!(joined.contains("--no-playlist"));
        assert!(joined.contains("--write-thumbnail"));
        assert!(joined.contains("--no-continue"));
        assert!(joined.contains("--limit-rate 1M"));
        assert!(joined.contains("--embed-metadata"));
        assert!(joined.contains("--cookies /tmp/c.txt"));
        assert_eq!(args.last().unwrap(), "https://example.com/v");
        assert!(!joined.contains("--write-subs"));
    }

    #[test]
    fn whole_collection_flag_forces_playlist() {
        let mut task = DownloadTask::new(Item::new("1", "t", "u"));
        task.options.whole_collection = true;
        let args = build_download_args(&DownloadInvocation {
            task: &task,
            output_template: "x".into(),
            cookie_file: None,
            proxy: Some("http://p:1".into()),
        });
        assert!(args.contains(&"--yes-playlist".to_string()));
        assert!(!args.contains(&"--no-playlist".to_string()));
        assert!(args.windows(2).any(|w| w[0] == "--proxy" && w[1] == "http://p:1"));
    }

    #[test]
    fn tracker_prefers_merge_then_extract() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("a.webm");
        let audio = dir.path().join("a.mp3");
        std::fs::write(&audio, b"x").unwrap();

        let mut tracker = OutputTracker::default();
        tracker.observe(&format!("[download] Destination: {}", raw.display()));
        tracker.observe(&format!("[ExtractAudio] Destination: {}", audio.display()));
        assert_eq!(tracker.produced_file(), Some(audio.clone()));

        tracker.observe(&format!("[Merger] Merging formats into \"{}\"", dir.path().join("gone.mkv").display()));
        assert_eq!(tracker.produced_file(), Some(audio));
    }
}
