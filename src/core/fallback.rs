use std::path::Path;

use async_trait::async_trait;
use tokio::sync::mpsc;

use medialoader_core::core::events::TaskState;
use medialoader_core::models::download::{DownloadResult, DownloadTask};
use medialoader_core::models::media::Item;

use crate::core::engine::{DownloadEngine, TaskHandle};

pub const FALLBACK_BACKEND: &str = "fallback";

/// A source that can try to serve an item it did not originate from.
#[async_trait]
pub trait MediaBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn download(
        &self,
        task: &DownloadTask,
        base_dir: &Path,
        handle: &TaskHandle,
        progress: Option<mpsc::Sender<f64>>,
    ) -> DownloadResult;
}

/// Picks the search hit to download: the closest duration among the first
/// candidates when the target duration is known, otherwise the first hit.
pub fn pick_candidate(hits: Vec<Item>, target_seconds: f64) -> Option<Item> {
    if target_seconds <= 0.0 {
        return hits.into_iter().next();
    }
    hits.into_iter()
        .filter(|h| h.duration_seconds > 0.0)
        .min_by(|a, b| {
            let da = (a.duration_seconds - target_seconds).abs();
            let db = (b.duration_seconds - target_seconds).abs();
            da.total_cmp(&db)
        })
}

/// Searches a host through the extraction tool and downloads the chosen hit
/// under the original item's name.
pub struct SearchBackend {
    name: String,
    prefix: String,
    candidates: u32,
    engine: DownloadEngine,
}

impl SearchBackend {
    pub fn new(name: &str, prefix: &str, candidates: u32, engine: DownloadEngine) -> Self {
        Self {
            name: name.to_string(),
            prefix: prefix.to_string(),
            candidates: candidates.max(1),
            engine,
        }
    }
}

#[async_trait]
impl MediaBackend for SearchBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn download(
        &self,
        task: &DownloadTask,
        base_dir: &Path,
        handle: &TaskHandle,
        progress: Option<mpsc::Sender<f64>>,
    ) -> DownloadResult {
        let query = task.item.search_query();
        let hits = match self
            .engine
            .extractor()
            .search(&self.prefix, &query, self.candidates)
            .await
        {
            Ok(hits) => hits,
            Err(e) => return DownloadResult::failed(e.to_string(), &self.name),
        };
        let hits: Vec<Item> = hits.into_iter().take(self.candidates as usize).collect();
        let Some(hit) = pick_candidate(hits.clone(), task.item.duration_seconds).or_else(|| hits.into_iter().next()) else {
            return DownloadResult::failed(format!("No results for '{}'", query), &self.name);
        };
        tracing::debug!("[fallback] {} picked {} for '{}'", self.name, hit.origin_url, query);

        let mut candidate = task.clone();
        candidate.item.origin_url = hit.origin_url;
        if candidate.item.duration_seconds <= 0.0 {
            candidate.item.duration_seconds = hit.duration_seconds;
        }
        self.engine
            .run_as(&self.name, &candidate, base_dir, handle, progress)
            .await
    }
}

/// Fixed-order list of backends tried until one succeeds.
#[derive(Default)]
pub struct FallbackChain {
    backends: Vec<Box<dyn MediaBackend>>,
}

impl FallbackChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, backend: Box<dyn MediaBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// Exactly one result per call. Each backend runs under its own child
    /// handle so one failed attempt cannot poison the next; cancelling
    /// `handle` stops the whole chain.
    pub async fn download_item(
        &self,
        task: &DownloadTask,
        base_dir: &Path,
        handle: &TaskHandle,
        progress: Option<mpsc::Sender<f64>>,
    ) -> DownloadResult {
        let name = task.item.display_name();
        handle.transition(TaskState::Running);

        for backend in &self.backends {
            if handle.is_cancelled() {
                handle.transition(TaskState::Cancelled);
                return DownloadResult::cancelled(backend.name());
            }

            let attempt = handle.child();
            let result = backend.download(task, base_dir, &attempt, progress.clone()).await;
            if result.success {
                handle.transition(TaskState::Completed);
                return result;
            }
            if result.is_cancelled() {
                handle.transition(TaskState::Cancelled);
                return result;
            }
            tracing::warn!(
                "[fallback] {} could not serve '{}': {}",
                backend.name(),
                name,
                result.error_message
            );
        }

        handle.transition(TaskState::Failed);
        DownloadResult::failed(format!("No source found for '{}'", name), FALLBACK_BACKEND)
    }
}
