use crate::core::engine::DownloadEngine;
use crate::core::fallback::SearchBackend;

pub const SEARCH_PREFIX: &str = "ytsearch";
/// Search hits compared by duration before picking one.
pub const SEARCH_CANDIDATES: u32 = 3;

/// Primary alternate host for catalog items.
pub fn search_backend(engine: DownloadEngine) -> SearchBackend {
    SearchBackend::new("youtube", SEARCH_PREFIX, SEARCH_CANDIDATES, engine)
}
