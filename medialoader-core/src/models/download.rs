use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::core::events::TaskState;
use crate::models::media::{Classification, Item};

pub const CANCELLED_MESSAGE: &str = "Download cancelled";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadOptions {
    pub subtitles: bool,
    pub thumbnail: bool,
    pub description: bool,
    pub resume: bool,
    pub embed_metadata: bool,
    /// Passed through as `--limit-rate`, e.g. `"2M"` or `"500K"`.
    pub rate_limit: Option<String>,
    /// Include the whole collection when the URL points into one.
    pub whole_collection: bool,
    pub cookies_file: Option<PathBuf>,
    pub skip_existing: bool,
    #[serde(default)]
    pub extra_flags: Vec<String>,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            subtitles: false,
            thumbnail: false,
            description: false,
            resume: true,
            embed_metadata: true,
            rate_limit: None,
            whole_collection: false,
            cookies_file: None,
            skip_existing: true,
            extra_flags: Vec::new(),
        }
    }
}

impl DownloadOptions {
    pub fn wants_auxiliary(&self) -> bool {
        self.description || self.thumbnail
    }
}

/// One attempt to materialize an item as a file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadTask {
    pub id: Uuid,
    pub item: Item,
    /// `"best"`, `"worst"` or a height bound such as `"720p"`.
    pub quality: String,
    /// Container or audio codec, e.g. `"mp4"` or `"mp3"`.
    pub format: Option<String>,
    pub audio_only: bool,
    /// Overrides the classification derived from the item metadata.
    pub classification: Option<Classification>,
    pub options: DownloadOptions,
}

impl DownloadTask {
    pub fn new(item: Item) -> Self {
        Self {
            id: Uuid::new_v4(),
            item,
            quality: "best".into(),
            format: None,
            audio_only: false,
            classification: None,
            options: DownloadOptions::default(),
        }
    }

    pub fn audio(mut self, format: impl Into<String>) -> Self {
        self.audio_only = true;
        self.format = Some(format.into());
        self
    }

    pub fn quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = quality.into();
        self
    }

    pub fn format(mut self, format: Option<String>) -> Self {
        self.format = format;
        self
    }

    pub fn classified_as(mut self, classification: Classification) -> Self {
        self.classification = Some(classification);
        self
    }

    pub fn with_options(mut self, options: DownloadOptions) -> Self {
        self.options = options;
        self
    }
}

/// Outcome of one download task. Never mutated once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadResult {
    pub success: bool,
    pub file_path: Option<PathBuf>,
    pub error_message: String,
    pub source_backend: String,
    pub outcome: TaskState,
}

impl DownloadResult {
    pub fn completed(file_path: PathBuf, backend: impl Into<String>) -> Self {
        Self {
            success: true,
            file_path: Some(file_path),
            error_message: String::new(),
            source_backend: backend.into(),
            outcome: TaskState::Completed,
        }
    }

    pub fn failed(message: impl Into<String>, backend: impl Into<String>) -> Self {
        Self {
            success: false,
            file_path: None,
            error_message: message.into(),
            source_backend: backend.into(),
            outcome: TaskState::Failed,
        }
    }

    pub fn cancelled(backend: impl Into<String>) -> Self {
        Self {
            success: false,
            file_path: None,
            error_message: CANCELLED_MESSAGE.to_string(),
            source_backend: backend.into(),
            outcome: TaskState::Cancelled,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.outcome == TaskState::Cancelled
    }

    /// The `(success, file_path, error_message)` triple reported to callers.
    pub fn as_triple(&self) -> (bool, Option<PathBuf>, String) {
        (self.success, self.file_path.clone(), self.error_message.clone())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoggedResult {
    pub task_id: Uuid,
    pub title: String,
    pub finished_at: DateTime<Utc>,
    pub result: DownloadResult,
}

/// Process-local, append-only record of finished tasks.
#[derive(Debug, Default)]
pub struct ResultLog {
    entries: Vec<LoggedResult>,
}

impl ResultLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, task: &DownloadTask, result: DownloadResult) {
        self.entries.push(LoggedResult {
            task_id: task.id,
            title: task.item.display_name(),
            finished_at: Utc::now(),
            result,
        });
    }

    pub fn entries(&self) -> &[LoggedResult] {
        &self.entries
    }

    pub fn total(&self) -> usize {
        self.entries.len()
    }

    pub fn success_count(&self) -> usize {
        self.entries.iter().filter(|e| e.result.success).count()
    }

    pub fn triples(&self) -> Vec<(bool, Option<PathBuf>, String)> {
        self.entries.iter().map(|e| e.result.as_triple()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_result_triple() {
        let result = DownloadResult::cancelled("ytdlp");
        assert_eq!(result.as_triple(), (false, None, CANCELLED_MESSAGE.to_string()));
        assert!(result.is_cancelled());
    }

    #[test]
    fn result_log_counts() {
        let task = DownloadTask::new(Item::new("1", "Song", "u"));
        let mut log = ResultLog::new();
        log.append(&task, DownloadResult::completed(PathBuf::from("a.mp3"), "youtube"));
        log.append(&task, DownloadResult::failed("boom", "soundcloud"));
        assert_eq!(log.total(), 2);
        assert_eq!(log.success_count(), 1);
        assert_eq!(log.triples()[1], (false, None, "boom".to_string()));
    }
}
