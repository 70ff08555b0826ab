use crate::platforms::{soundcloud, youtube};
use crate::AppState;

pub async fn search(state: &AppState, query: &str, limit: u32, secondary: bool) -> anyhow::Result<()> {
    let prefix = if secondary {
        soundcloud::SEARCH_PREFIX
    } else {
        youtube::SEARCH_PREFIX
    };
    let hits = state.engine.extractor().search(prefix, query, limit).await?;
    if hits.is_empty() {
        println!("No results for '{}'", query);
        return Ok(());
    }
    for (i, hit) in hits.iter().enumerate() {
        let duration = if hit.duration_seconds > 0.0 {
            let secs = hit.duration_seconds.round() as u64;
            format!("{}:{:02}", secs / 60, secs % 60)
        } else {
            "-".to_string()
        };
        println!("{:>2}. {} [{}]\n    {}", i + 1, hit.display_name(), duration, hit.origin_url);
    }
    Ok(())
}
