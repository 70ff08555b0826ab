use crate::core::url_parser;

pub fn resolve_url(url: &str) -> anyhow::Result<()> {
    match url_parser::resolve(url) {
        Some(link) => {
            let out = serde_json::json!({
                "service": link.service,
                "kind": link.kind,
                "class": link.kind.class(),
                "id": link.id,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
            Ok(())
        }
        None => Err(anyhow::anyhow!("URL not recognized: {}", url)),
    }
}
