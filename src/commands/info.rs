use crate::AppState;

pub async fn print_info(state: &AppState, url: &str) -> anyhow::Result<()> {
    let item = state
        .fetcher
        .fetch(url)
        .await
        .ok_or_else(|| anyhow::anyhow!("Item not found: {}", url))?;
    println!("{}", serde_json::to_string_pretty(&item)?);
    Ok(())
}
