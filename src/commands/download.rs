use std::path::{Path, PathBuf};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use medialoader_core::core::events::{EventEmitter, TaskProgress};
use medialoader_core::models::download::{DownloadOptions, DownloadResult, DownloadTask};
use medialoader_core::models::media::{Classification, Item};
use medialoader_core::models::settings::DownloadSettings;

use crate::core::engine::TaskHandle;
use crate::core::events::ConsoleEventEmitter;
use crate::core::filename::sanitize_path_component;
use crate::core::url_parser::{self, LinkClass};
use crate::{AppState, DownloadArgs};

pub fn build_options(args: &DownloadArgs, settings: &DownloadSettings) -> DownloadOptions {
    DownloadOptions {
        subtitles: args.subs || settings.download_subtitles,
        thumbnail: args.thumbnail || settings.download_thumbnail,
        description: args.description || settings.download_description,
        resume: true,
        embed_metadata: settings.embed_metadata,
        rate_limit: args.limit_rate.clone().or_else(|| settings.rate_limit.clone()),
        whole_collection: args.collection,
        cookies_file: args.cookies.clone(),
        skip_existing: settings.skip_existing && !args.force,
        extra_flags: settings.extra_ytdlp_flags.clone(),
    }
}

/// Task for one item. Catalog items always go the audio route.
pub fn build_task(item: Item, args: &DownloadArgs, settings: &DownloadSettings, music: bool) -> DownloadTask {
    let mut task = DownloadTask::new(item)
        .quality(args.quality.clone().unwrap_or_else(|| settings.video_quality.clone()))
        .with_options(build_options(args, settings));

    if args.audio || music {
        task = task.audio(args.format.clone().unwrap_or_else(|| settings.audio_format.clone()));
    } else {
        task = task.format(args.format.clone());
    }

    if music {
        task = task.classified_as(Classification::Plain);
    } else if args.movie {
        task = task.classified_as(Classification::Movie);
    } else if args.series {
        task = task.classified_as(Classification::SeriesEpisode);
    }
    task
}

/// Music files land flat in the base directory, or in a folder named after
/// their album/playlist.
pub fn music_dir(base: &Path, item: &Item) -> PathBuf {
    match item.collection_name.as_deref().filter(|c| !c.trim().is_empty()) {
        Some(collection) => base.join(sanitize_path_component(collection)),
        None => base.to_path_buf(),
    }
}

fn spawn_interrupt_listener(shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling current download");
            shutdown.cancel();
        }
    })
}

struct Run<'a> {
    state: &'a AppState,
    args: &'a DownloadArgs,
    base: PathBuf,
    music: bool,
    shutdown: CancellationToken,
    emitter: ConsoleEventEmitter,
}

impl Run<'_> {
    async fn item(&self, item: Item) -> DownloadResult {
        let task = build_task(item, self.args, &self.state.settings.download, self.music);
        let handle = TaskHandle::with_parent(&self.shutdown);
        let title = task.item.display_name();

        let (tx, mut rx) = mpsc::channel::<f64>(64);
        let printer = {
            let emitter = self.emitter.clone();
            let title = title.clone();
            let task_id = handle.id();
            let mut states = handle.subscribe();
            tokio::spawn(async move {
                while let Some(percent) = rx.recv().await {
                    emitter.emit_progress(&TaskProgress {
                        task_id,
                        title: title.clone(),
                        percent,
                        state: *states.borrow_and_update(),
                    });
                }
            })
        };

        let result = if self.music {
            let dir = music_dir(&self.base, &task.item);
            self.state.fallback.download_item(&task, &dir, &handle, Some(tx)).await
        } else {
            self.state.engine.run(&task, &self.base, &handle, Some(tx)).await
        };
        let _ = printer.await;

        self.emitter.emit_progress(&TaskProgress {
            task_id: handle.id(),
            title,
            percent: if result.success { 100.0 } else { 0.0 },
            state: result.outcome,
        });
        self.state.results.lock().await.append(&task, result.clone());
        result
    }

    async fn not_found(&self, url: &str) -> DownloadResult {
        let result = DownloadResult::failed(format!("Item not found: {}", url), "metadata");
        let task = DownloadTask::new(Item::new(url, url, url));
        self.state.results.lock().await.append(&task, result.clone());
        result
    }
}

fn report(n: usize, total: usize, ok: usize, result: &DownloadResult) {
    match (&result.file_path, result.success) {
        (Some(path), true) => println!("[{}/{}] ok ({} done): {}", n, total, ok, path.display()),
        _ => println!("[{}/{}] {}: {}", n, total, result.outcome, result.error_message),
    }
}

pub async fn download(state: &AppState, args: DownloadArgs) -> anyhow::Result<()> {
    let link = url_parser::resolve(&args.url)
        .ok_or_else(|| anyhow::anyhow!("URL not recognized: {}", args.url))?;

    let shutdown = CancellationToken::new();
    let listener = spawn_interrupt_listener(shutdown.clone());

    let run = Run {
        state,
        args: &args,
        base: args
            .output
            .clone()
            .unwrap_or_else(|| state.settings.download.default_output_dir.clone()),
        music: link.service.is_catalog(),
        shutdown: shutdown.clone(),
        emitter: ConsoleEventEmitter::new(),
    };

    if link.kind.class() == LinkClass::Single {
        let result = match state.fetcher.fetch(&args.url).await {
            Some(item) => run.item(item).await,
            None => run.not_found(&args.url).await,
        };
        report(1, 1, usize::from(result.success), &result);
    } else {
        let collection = state.expander.expand(&link, args.max_items).await?;
        let total = collection.len();
        println!("{}: {} items", if collection.name.is_empty() { &link.id } else { &collection.name }, total);

        let mut ok = 0;
        for (n, item) in collection.into_items().into_iter().enumerate() {
            if shutdown.is_cancelled() {
                break;
            }
            let item = state.fetcher.complete(item).await;
            let result = run.item(item).await;
            ok += usize::from(result.success);
            report(n + 1, total, ok, &result);
        }
    }

    listener.abort();

    let log = state.results.lock().await;
    println!("{}/{} downloaded", log.success_count(), log.total());
    if log.total() > 0 && log.success_count() == 0 {
        let last = log
            .entries()
            .last()
            .map(|e| e.result.error_message.clone())
            .unwrap_or_default();
        return Err(anyhow::anyhow!("Nothing downloaded: {}", last));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Wrapper {
        #[command(flatten)]
        args: DownloadArgs,
    }

    fn args(extra: &[&str]) -> DownloadArgs {
        let mut argv = vec!["test", "https://example.org/v"];
        argv.extend_from_slice(extra);
        Wrapper::parse_from(argv).args
    }

    #[test]
    fn catalog_items_become_plain_audio() {
        let settings = DownloadSettings::default();
        let item = Item::new("1", "Song", "https://open.spotify.com/track/1");
        let task = build_task(item, &args(&["--movie"]), &settings, true);
        assert!(task.audio_only);
        assert_eq!(task.format.as_deref(), Some("mp3"));
        assert_eq!(task.classification, Some(Classification::Plain));
    }

    #[test]
    fn video_flags_map_to_options() {
        let mut settings = DownloadSettings::default();
        settings.rate_limit = Some("5M".into());
        let a = args(&["--series", "--subs", "--limit-rate", "1M", "-q", "720p", "--force"]);
        let task = build_task(Item::new("1", "Ep", "https://zdf.de/x.html"), &a, &settings, false);
        assert!(!task.audio_only);
        assert_eq!(task.quality, "720p");
        assert_eq!(task.classification, Some(Classification::SeriesEpisode));
        assert!(task.options.subtitles);
        assert_eq!(task.options.rate_limit.as_deref(), Some("1M"));
        assert!(!task.options.skip_existing);
    }

    #[test]
    fn music_dir_uses_collection_name() {
        let base = Path::new("/music");
        let single = Item::new("1", "Song", "u");
        assert_eq!(music_dir(base, &single), PathBuf::from("/music"));
        let track = single.in_collection("Best Of: Vol. 2", Some(1), Some(3));
        assert_eq!(music_dir(base, &track), PathBuf::from("/music/Best Of Vol. 2"));
    }
}
