use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use medialoader_core::core::events::TaskState;
use medialoader_core::models::download::{DownloadResult, DownloadTask};
use medialoader_core::models::settings::AdvancedSettings;

use crate::core::cleanup::{self, CancelledOutput, CleanupPolicy};
use crate::core::cookies::EphemeralCookieFile;
use crate::core::filename::{escape_template, output_stem, stem_key};
use crate::core::paths::{self, PreparedDestination};
use crate::core::process::{self, terminate_process_tree};
use crate::core::ytdlp::{self, DownloadInvocation, Extractor, OutputTracker};
use crate::platforms::Service;

const MEDIA_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "webm", "mov", "avi", "flv", "m4v", "ts", "mp3", "m4a", "aac", "opus", "ogg",
    "flac", "wav", "alac",
];
const THUMBNAIL_EXTENSIONS: &[&str] = &["jpg", "jpeg", "webp", "png"];
const LINE_QUEUE_CAPACITY: usize = 256;
const DRAIN_IDLE: Duration = Duration::from_millis(300);
/// Total time spent collecting output after the extractor exited.
const DRAIN_DEADLINE: Duration = Duration::from_secs(2);

/// Caller-side handle on one download task.
///
/// Cancelling is cooperative: the engine observes the token and tears the
/// subprocess tree down. The first terminal state written wins; later writes
/// are ignored.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: Uuid,
    token: CancellationToken,
    state: Arc<watch::Sender<TaskState>>,
}

impl Default for TaskHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskHandle {
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// Handle cancelled together with `parent` (e.g. a Ctrl-C token).
    pub fn with_parent(parent: &CancellationToken) -> Self {
        Self::with_token(parent.child_token())
    }

    fn with_token(token: CancellationToken) -> Self {
        let (tx, _) = watch::channel(TaskState::Preparing);
        Self {
            id: Uuid::new_v4(),
            token,
            state: Arc::new(tx),
        }
    }

    /// Fresh handle for a sub-attempt, cancelled whenever this one is.
    pub fn child(&self) -> Self {
        Self::with_token(self.token.child_token())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn request_cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn state(&self) -> TaskState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<TaskState> {
        self.state.subscribe()
    }

    /// Applies `next` if the lifecycle allows it. Returns whether it was applied.
    pub fn transition(&self, next: TaskState) -> bool {
        let applied = self.state.send_if_modified(|current| {
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                false
            }
        });
        if applied {
            tracing::debug!("[engine] task {} -> {}", self.id, next);
        }
        applied
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on a single output-queue read before re-checking the child.
    pub read_timeout: Duration,
    /// Upper bound on a single wait for child exit.
    pub wait_timeout: Duration,
    pub kill_grace: Duration,
    pub cleanup: CleanupPolicy,
    pub error_tail_lines: usize,
    pub proxy: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_settings(&AdvancedSettings::default(), None)
    }
}

impl EngineConfig {
    pub fn from_settings(advanced: &AdvancedSettings, proxy: Option<String>) -> Self {
        Self {
            read_timeout: Duration::from_millis(advanced.cancel_poll_ms.max(10)),
            wait_timeout: Duration::from_secs(1),
            kill_grace: Duration::from_millis(advanced.kill_grace_ms),
            cleanup: CleanupPolicy {
                min_bytes: advanced.min_partial_bytes,
                recent: Duration::from_secs(advanced.recent_partial_secs),
            },
            error_tail_lines: advanced.error_tail_lines.max(1),
            proxy,
        }
    }
}

/// Drives the extraction subprocess for one task at a time per call. Calls
/// share no mutable state, so several may run concurrently.
#[derive(Debug, Clone)]
pub struct DownloadEngine {
    extractor: Extractor,
    config: EngineConfig,
}

struct RunningChild {
    child: Child,
    pid: Option<u32>,
    lines: mpsc::Receiver<String>,
    reader: JoinHandle<()>,
    watcher: Option<JoinHandle<()>>,
    finished: CancellationToken,
}

impl RunningChild {
    async fn stop_watcher(&mut self) {
        self.finished.cancel();
        if let Some(watcher) = self.watcher.take() {
            let _ = watcher.await;
        }
    }
}

enum Exit {
    Cancelled,
    Exited(ExitStatus),
    WaitFailed(std::io::Error),
}

struct LineSink {
    tracker: OutputTracker,
    tail: VecDeque<String>,
    tail_len: usize,
    progress: Option<mpsc::Sender<f64>>,
}

impl LineSink {
    fn observe(&mut self, line: String) {
        if let Some(pct) = ytdlp::parse_progress_line(&line) {
            if let Some(tx) = &self.progress {
                let _ = tx.try_send(pct);
            }
            return;
        }
        tracing::trace!("[extractor] {}", line);
        self.tracker.observe(&line);
        if line.trim().is_empty() {
            return;
        }
        if self.tail.len() == self.tail_len {
            self.tail.pop_front();
        }
        self.tail.push_back(line);
    }

    fn error_message(&self, status: &ExitStatus) -> String {
        if self.tail.is_empty() {
            format!("Extractor exited with {}", status)
        } else {
            self.tail.iter().cloned().collect::<Vec<_>>().join("\n")
        }
    }
}

impl DownloadEngine {
    pub fn new(extractor: Extractor, config: EngineConfig) -> Self {
        Self { extractor, config }
    }

    pub fn extractor(&self) -> &Extractor {
        &self.extractor
    }

    /// Runs `task`, labelling the result with the service the item came from.
    pub async fn run(
        &self,
        task: &DownloadTask,
        base_dir: &Path,
        handle: &TaskHandle,
        progress: Option<mpsc::Sender<f64>>,
    ) -> DownloadResult {
        let backend = Service::from_url(&task.item.origin_url)
            .map(|s| s.to_string())
            .unwrap_or_else(|| "extractor".to_string());
        self.run_as(&backend, task, base_dir, handle, progress).await
    }

    /// Runs `task` to exactly one result. Never returns an error: failures and
    /// cancellation are reported through the result.
    pub async fn run_as(
        &self,
        backend: &str,
        task: &DownloadTask,
        base_dir: &Path,
        handle: &TaskHandle,
        progress: Option<mpsc::Sender<f64>>,
    ) -> DownloadResult {
        let result = self.execute(backend, task, base_dir, handle, progress).await;
        handle.transition(result.outcome);
        match result.outcome {
            TaskState::Completed => tracing::info!(
                "[engine] '{}' completed via {}: {:?}",
                task.item.display_name(),
                backend,
                result.file_path
            ),
            TaskState::Cancelled => {
                tracing::info!("[engine] '{}' cancelled", task.item.display_name())
            }
            _ => tracing::warn!(
                "[engine] '{}' failed via {}: {}",
                task.item.display_name(),
                backend,
                result.error_message
            ),
        }
        result
    }

    async fn execute(
        &self,
        backend: &str,
        task: &DownloadTask,
        base_dir: &Path,
        handle: &TaskHandle,
        progress: Option<mpsc::Sender<f64>>,
    ) -> DownloadResult {
        let started_at = SystemTime::now();
        if handle.is_cancelled() {
            return DownloadResult::cancelled(backend);
        }

        let dest = match paths::prepare_destination(&task.item, base_dir, task.classification).await {
            Ok(dest) => dest,
            Err(e) => return DownloadResult::failed(e.to_string(), backend),
        };

        let stem = output_stem(&task.item.artist, &task.item.title);
        let expected_ext = expected_extension(task);

        if task.options.skip_existing {
            if let Some(existing) = find_existing(&dest.dir, &stem, expected_ext.as_deref()) {
                tracing::info!("[engine] {:?} already present, skipping transfer", existing);
                if task.options.wants_auxiliary() {
                    write_auxiliary(task, &existing).await;
                }
                return DownloadResult::completed(existing, "existing");
            }
        }

        let cookie_file = match task.options.cookies_file.as_deref() {
            Some(source) => match EphemeralCookieFile::create(source) {
                Ok(file) => Some(file),
                Err(e) => return DownloadResult::failed(e.to_string(), backend),
            },
            None => None,
        };

        let output_template = dest
            .dir
            .join(format!("{}.%(ext)s", escape_template(&stem)))
            .to_string_lossy()
            .to_string();
        let args = ytdlp::build_download_args(&DownloadInvocation {
            task,
            output_template,
            cookie_file: cookie_file.as_ref().map(|c| c.path()),
            proxy: self.config.proxy.clone(),
        });

        let mut running = match self.spawn(&args, handle) {
            Ok(running) => running,
            Err(e) => return DownloadResult::failed(e.to_string(), backend),
        };
        handle.transition(TaskState::Running);

        let mut sink = LineSink {
            tracker: OutputTracker::default(),
            tail: VecDeque::with_capacity(self.config.error_tail_lines),
            tail_len: self.config.error_tail_lines,
            progress,
        };

        let exit = self.supervise(&mut running, handle, &mut sink).await;

        let status = match exit {
            Exit::Cancelled => {
                return self.finish_cancelled(running, handle, &dest, &stem, started_at, backend).await;
            }
            Exit::WaitFailed(e) => {
                running.reader.abort();
                running.stop_watcher().await;
                return DownloadResult::failed(format!("Failed to wait for extractor: {}", e), backend);
            }
            Exit::Exited(status) => status,
        };

        running.stop_watcher().await;
        if handle.state() == TaskState::Cancelled {
            return self.finish_cancelled(running, handle, &dest, &stem, started_at, backend).await;
        }

        drain_lines(&mut running.lines, &mut sink, DRAIN_IDLE, DRAIN_DEADLINE).await;
        running.reader.abort();

        if !status.success() {
            return DownloadResult::failed(sink.error_message(&status), backend);
        }

        if let Some(tx) = &sink.progress {
            let _ = tx.try_send(100.0);
        }

        let produced = sink
            .tracker
            .produced_file()
            .or_else(|| newest_with_extension(&dest.dir, expected_ext.as_deref(), started_at));
        let Some(file) = produced else {
            return DownloadResult::failed(
                format!("Extractor finished but no output file was found in {:?}", dest.dir),
                backend,
            );
        };

        if task.options.wants_auxiliary() {
            write_auxiliary(task, &file).await;
        }
        DownloadResult::completed(file, backend)
    }

    fn spawn(&self, args: &[String], handle: &TaskHandle) -> anyhow::Result<RunningChild> {
        let mut child = process::group_command(&self.extractor.path)
            .args(&self.extractor.extra_args)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| anyhow::anyhow!("Failed to start extractor {:?}: {}", self.extractor.path, e))?;

        let pid = child.id();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("Extractor stdout unavailable"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow::anyhow!("Extractor stderr unavailable"))?;

        let (tx, lines) = mpsc::channel(LINE_QUEUE_CAPACITY);
        let reader = spawn_reader(stdout, stderr, tx);

        let finished = CancellationToken::new();
        let watcher = {
            let handle = handle.clone();
            let finished = finished.clone();
            let grace = self.config.kill_grace;
            tokio::spawn(async move {
                tokio::select! {
                    _ = finished.cancelled() => {}
                    _ = handle.token().cancelled() => {
                        handle.transition(TaskState::Cancelled);
                        if let Some(pid) = pid {
                            terminate_process_tree(pid, grace).await;
                        }
                    }
                }
            })
        };

        tracing::debug!("[engine] spawned extractor pid {:?}: {:?}", pid, args);
        Ok(RunningChild {
            child,
            pid,
            lines,
            reader,
            watcher: Some(watcher),
            finished,
        })
    }

    /// Control loop. Only ever blocks on bounded reads and bounded waits, and
    /// checks cancellation before each.
    async fn supervise(
        &self,
        running: &mut RunningChild,
        handle: &TaskHandle,
        sink: &mut LineSink,
    ) -> Exit {
        let mut reader_open = true;
        loop {
            if reader_open {
                tokio::select! {
                    biased;
                    _ = handle.token().cancelled() => return Exit::Cancelled,
                    next = tokio::time::timeout(self.config.read_timeout, running.lines.recv()) => {
                        match next {
                            Ok(Some(line)) => sink.observe(line),
                            Ok(None) => reader_open = false,
                            Err(_) => match running.child.try_wait() {
                                Ok(Some(status)) => return Exit::Exited(status),
                                Ok(None) => {}
                                Err(e) => return Exit::WaitFailed(e),
                            },
                        }
                    }
                }
            } else {
                tokio::select! {
                    biased;
                    _ = handle.token().cancelled() => return Exit::Cancelled,
                    waited = tokio::time::timeout(self.config.wait_timeout, running.child.wait()) => {
                        match waited {
                            Ok(Ok(status)) => return Exit::Exited(status),
                            Ok(Err(e)) => return Exit::WaitFailed(e),
                            Err(_) => {}
                        }
                    }
                }
            }
        }
    }

    async fn finish_cancelled(
        &self,
        mut running: RunningChild,
        handle: &TaskHandle,
        dest: &PreparedDestination,
        stem: &str,
        started_at: SystemTime,
        backend: &str,
    ) -> DownloadResult {
        handle.transition(TaskState::Cancelled);
        if let Some(pid) = running.pid {
            terminate_process_tree(pid, self.config.kill_grace).await;
        }

        let reaped = tokio::time::timeout(
            self.config.kill_grace + self.config.wait_timeout,
            running.child.wait(),
        )
        .await;
        if reaped.is_err() {
            tracing::warn!("[engine] extractor did not exit after termination, killing");
            let _ = running.child.start_kill();
            let _ = tokio::time::timeout(self.config.wait_timeout, running.child.wait()).await;
        }
        running.reader.abort();
        running.stop_watcher().await;

        let report = cleanup::reconcile_cancelled(
            &CancelledOutput {
                dir: &dest.dir,
                stem,
                started_at,
                created_root: dest.created_root.as_deref(),
            },
            self.config.cleanup,
        );
        tracing::debug!(
            "[engine] cancellation cleanup removed {} files, {} directories",
            report.removed_files.len(),
            report.removed_dirs.len()
        );
        DownloadResult::cancelled(backend)
    }
}

fn spawn_reader(stdout: ChildStdout, stderr: ChildStderr, tx: mpsc::Sender<String>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut out = BufReader::new(stdout).lines();
        let mut err = BufReader::new(stderr).lines();
        let mut out_open = true;
        let mut err_open = true;

        while out_open || err_open {
            let line = tokio::select! {
                line = out.next_line(), if out_open => match line {
                    Ok(Some(line)) => Some(line),
                    _ => {
                        out_open = false;
                        None
                    }
                },
                line = err.next_line(), if err_open => match line {
                    Ok(Some(line)) => Some(line),
                    _ => {
                        err_open = false;
                        None
                    }
                },
            };
            if let Some(line) = line {
                if tx.send(line).await.is_err() {
                    break;
                }
            }
        }
    })
}

/// Collects lines still queued after exit. Stops after `idle` without a line
/// or once `deadline` has passed, since grandchildren may keep the pipes open.
async fn drain_lines(
    lines: &mut mpsc::Receiver<String>,
    sink: &mut LineSink,
    idle: Duration,
    deadline: Duration,
) {
    let until = tokio::time::Instant::now() + deadline;
    loop {
        let wait = idle.min(until.saturating_duration_since(tokio::time::Instant::now()));
        if wait.is_zero() {
            tracing::debug!("[engine] output still flowing after exit, stop collecting");
            break;
        }
        match tokio::time::timeout(wait, lines.recv()).await {
            Ok(Some(line)) => sink.observe(line),
            _ => break,
        }
    }
}

fn expected_extension(task: &DownloadTask) -> Option<String> {
    if task.audio_only {
        Some(task.format.clone().unwrap_or_else(|| "mp3".into()).to_lowercase())
    } else {
        task.format.as_ref().map(|f| f.to_lowercase())
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension().map(|e| e.to_string_lossy().to_lowercase())
}

fn has_expected_extension(path: &Path, expected: Option<&str>) -> bool {
    match (extension_of(path), expected) {
        (Some(ext), Some(expected)) => ext == expected,
        (Some(ext), None) => MEDIA_EXTENSIONS.contains(&ext.as_str()),
        (None, _) => false,
    }
}

fn media_files(dir: &Path) -> Vec<(PathBuf, std::fs::Metadata)> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            let meta = entry.metadata().ok()?;
            let hidden = path
                .file_name()
                .is_some_and(|n| n.to_string_lossy().starts_with('.'));
            (meta.is_file() && !hidden && !cleanup::is_temp_artifact(&path)).then_some((path, meta))
        })
        .collect()
}

/// A finished file for `stem` with the expected extension: the exact name
/// first, then any name with the same [`stem_key`].
pub fn find_existing(dir: &Path, stem: &str, expected_ext: Option<&str>) -> Option<PathBuf> {
    if let Some(ext) = expected_ext {
        let exact = dir.join(format!("{}.{}", stem, ext));
        if exact.is_file() {
            return Some(exact);
        }
    }

    let key = stem_key(stem);
    if key.is_empty() {
        return None;
    }
    media_files(dir)
        .into_iter()
        .map(|(path, _)| path)
        .find(|path| {
            has_expected_extension(path, expected_ext)
                && path
                    .file_stem()
                    .is_some_and(|s| stem_key(&s.to_string_lossy()) == key)
        })
}

fn newest_with_extension(dir: &Path, expected_ext: Option<&str>, since: SystemTime) -> Option<PathBuf> {
    media_files(dir)
        .into_iter()
        .filter(|(path, _)| has_expected_extension(path, expected_ext))
        .filter_map(|(path, meta)| meta.modified().ok().map(|m| (path, m)))
        .filter(|(_, modified)| *modified >= since.checked_sub(Duration::from_secs(2)).unwrap_or(since))
        .max_by_key(|(_, modified)| *modified)
        .map(|(path, _)| path)
}

fn description_text(task: &DownloadTask) -> String {
    let item = &task.item;
    let mut text = String::new();
    text.push_str(&item.display_name());
    text.push('\n');
    if let Some(collection) = &item.collection_name {
        text.push_str(collection);
        if let Some(group) = item.group_number {
            text.push_str(&format!(", group {}", group));
        }
        if let Some(seq) = item.sequence_number {
            text.push_str(&format!(", #{}", seq));
        }
        text.push('\n');
    }
    if item.duration_seconds > 0.0 {
        let secs = item.duration_seconds.round() as u64;
        text.push_str(&format!("{}:{:02}\n", secs / 60, secs % 60));
    }
    text.push_str(&item.origin_url);
    text.push('\n');
    if let Some(description) = item.description.as_deref().filter(|d| !d.trim().is_empty()) {
        text.push('\n');
        text.push_str(description.trim());
        text.push('\n');
    }
    text
}

/// Description file and thumbnail placement. Failures are warnings only.
async fn write_auxiliary(task: &DownloadTask, media: &Path) {
    let (Some(dir), Some(stem)) = (media.parent(), media.file_stem()) else {
        return;
    };
    let stem = stem.to_string_lossy().to_string();

    if task.options.description {
        let target = dir.join(format!("{}.description.txt", stem));
        if let Err(e) = tokio::fs::write(&target, description_text(task)).await {
            tracing::warn!("[engine] failed to write {:?}: {}", target, e);
        }
    }

    if task.options.thumbnail {
        relocate_thumbnail(dir, &stem).await;
    }
}

async fn relocate_thumbnail(dir: &Path, media_stem: &str) {
    let key = stem_key(media_stem);
    let candidate = media_files(dir).into_iter().map(|(p, _)| p).find(|path| {
        extension_of(path).is_some_and(|e| THUMBNAIL_EXTENSIONS.contains(&e.as_str()))
            && path
                .file_stem()
                .is_some_and(|s| stem_key(&s.to_string_lossy()).starts_with(&key))
    });
    let Some(found) = candidate else {
        tracing::debug!("[engine] no thumbnail found for '{}'", media_stem);
        return;
    };

    let ext = extension_of(&found).unwrap_or_else(|| "jpg".into());
    let canonical = dir.join(format!("{}.{}", media_stem, ext));
    if found == canonical {
        return;
    }
    if let Err(e) = tokio::fs::rename(&found, &canonical).await {
        tracing::warn!("[engine] failed to move thumbnail {:?}: {}", found, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medialoader_core::models::media::Item;

    #[test]
    fn handle_first_terminal_state_wins() {
        let handle = TaskHandle::new();
        assert!(handle.transition(TaskState::Running));
        assert!(handle.transition(TaskState::Cancelled));
        assert!(!handle.transition(TaskState::Completed));
        assert_eq!(handle.state(), TaskState::Cancelled);
    }

    #[test]
    fn parent_cancel_reaches_children() {
        let parent = CancellationToken::new();
        let handle = TaskHandle::with_parent(&parent);
        let sub = handle.child();
        parent.cancel();
        assert!(handle.is_cancelled());
        assert!(sub.is_cancelled());

        let other = TaskHandle::new();
        other.child().request_cancel();
        assert!(!other.is_cancelled());
    }

    #[test]
    fn existing_exact_and_fuzzy_match() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Band - Track.mp3"), b"x").unwrap();
        assert!(find_existing(dir.path(), "Band - Track", Some("mp3")).is_some());
        assert!(find_existing(dir.path(), "band  track", Some("mp3")).is_some());
        assert!(find_existing(dir.path(), "Band - Track", Some("flac")).is_none());
        assert!(find_existing(dir.path(), "Band - Other", Some("mp3")).is_none());
        assert!(find_existing(dir.path(), "Band - Track", None).is_some());
    }

    #[test]
    fn partial_files_never_count_as_existing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Band - Track.mp3.part"), b"x").unwrap();
        assert!(find_existing(dir.path(), "Band - Track", None).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn tail_keeps_last_lines() {
        let mut sink = LineSink {
            tracker: OutputTracker::default(),
            tail: VecDeque::new(),
            tail_len: 2,
            progress: None,
        };
        for line in ["one", "download: 10%", "two", "", "three"] {
            sink.observe(line.to_string());
        }
        let status = std::process::Command::new("true").status().unwrap();
        assert_eq!(sink.error_message(&status), "two\nthree");
    }

    #[tokio::test]
    async fn skips_transfer_when_file_exists() {
        let base = tempfile::tempdir().unwrap();
        let item = Item::new("1", "Track", "https://example.org/t").with_artist("Band");
        std::fs::write(base.path().join("Band - Track.mp3"), b"audio").unwrap();

        let mut task = DownloadTask::new(item).audio("mp3");
        task.options.description = true;

        let engine = DownloadEngine::new(Extractor::new("/nonexistent/extractor"), EngineConfig::default());
        let handle = TaskHandle::new();
        let result = engine.run(&task, base.path(), &handle, None).await;

        assert!(result.success);
        assert_eq!(result.source_backend, "existing");
        assert_eq!(handle.state(), TaskState::Completed);
        let description = base.path().join("Band - Track.description.txt");
        let text = std::fs::read_to_string(description).unwrap();
        assert!(text.starts_with("Band - Track\n"));
    }

    #[tokio::test]
    async fn existing_file_without_auxiliary_request_writes_nothing() {
        let base = tempfile::tempdir().unwrap();
        let item = Item::new("1", "Track", "https://example.org/t").with_artist("Band");
        std::fs::write(base.path().join("Band - Track.mp3"), b"audio").unwrap();

        let task = DownloadTask::new(item).audio("mp3");
        let engine = DownloadEngine::new(Extractor::new("/nonexistent/extractor"), EngineConfig::default());
        let result = engine.run(&task, base.path(), &TaskHandle::new(), None).await;

        assert!(result.success);
        assert_eq!(std::fs::read_dir(base.path()).unwrap().count(), 1);
    }

    fn sink() -> LineSink {
        LineSink {
            tracker: OutputTracker::default(),
            tail: VecDeque::new(),
            tail_len: 5,
            progress: None,
        }
    }

    #[tokio::test]
    async fn drain_stops_at_deadline_while_output_continues() {
        let (tx, mut rx) = mpsc::channel(LINE_QUEUE_CAPACITY);
        let chatter = tokio::spawn(async move {
            loop {
                if tx.send("[info] still here".to_string()).await.is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        });

        let mut sink = sink();
        let started = std::time::Instant::now();
        drain_lines(&mut rx, &mut sink, Duration::from_millis(300), Duration::from_millis(400)).await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!sink.tail.is_empty());
        drop(rx);
        chatter.abort();
    }

    #[tokio::test]
    async fn drain_returns_when_senders_are_gone() {
        let (tx, mut rx) = mpsc::channel(LINE_QUEUE_CAPACITY);
        tx.send("[ExtractAudio] Destination: /tmp/a.mp3".to_string()).await.unwrap();
        drop(tx);

        let mut sink = sink();
        drain_lines(&mut rx, &mut sink, Duration::from_secs(5), Duration::from_secs(30)).await;
        assert_eq!(sink.tail.len(), 1);
    }

    #[tokio::test]
    async fn cancelled_before_start_launches_nothing() {
        let base = tempfile::tempdir().unwrap();
        let task = DownloadTask::new(Item::new("1", "T", "https://example.org/t"));
        let handle = TaskHandle::new();
        handle.request_cancel();

        let engine = DownloadEngine::new(Extractor::new("/nonexistent/extractor"), EngineConfig::default());
        let result = engine.run(&task, base.path(), &handle, None).await;
        assert!(result.is_cancelled());
        assert_eq!(handle.state(), TaskState::Cancelled);
    }

    #[tokio::test]
    async fn missing_extractor_fails_cleanly() {
        let base = tempfile::tempdir().unwrap();
        let task = DownloadTask::new(Item::new("1", "T", "https://example.org/t"));
        let engine = DownloadEngine::new(Extractor::new("/nonexistent/extractor"), EngineConfig::default());
        let result = engine.run(&task, base.path(), &TaskHandle::new(), None).await;
        assert!(!result.success);
        assert!(result.error_message.contains("Failed to start extractor"));
    }
}
