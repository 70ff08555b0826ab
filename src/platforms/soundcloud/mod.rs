use crate::core::engine::DownloadEngine;
use crate::core::fallback::SearchBackend;

pub const SEARCH_PREFIX: &str = "scsearch";

/// Secondary host, tried after the primary one. Takes the first hit.
pub fn search_backend(engine: DownloadEngine) -> SearchBackend {
    SearchBackend::new("soundcloud", SEARCH_PREFIX, 1, engine)
}
