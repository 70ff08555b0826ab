use std::io::Write;
use std::path::Path;

use anyhow::anyhow;
use serde::Deserialize;

const NETSCAPE_HEADER: &str = "# Netscape HTTP Cookie File";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonCookie {
    domain: String,
    #[serde(default = "default_cookie_path")]
    path: String,
    #[serde(default)]
    secure: bool,
    #[serde(default)]
    expiration_date: Option<f64>,
    name: String,
    #[serde(default)]
    value: String,
}

fn default_cookie_path() -> String {
    "/".into()
}

/// Converts cookie text (Netscape tab format or a JSON array of cookie
/// objects) into a clean Netscape cookie file.
pub fn normalize_cookie_text(text: &str) -> anyhow::Result<String> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('[') {
        let cookies: Vec<JsonCookie> = serde_json::from_str(trimmed)
            .map_err(|e| anyhow!("Invalid JSON cookie file: {}", e))?;
        return Ok(json_to_netscape(&cookies));
    }
    Ok(repair_netscape(text))
}

fn json_to_netscape(cookies: &[JsonCookie]) -> String {
    let mut out = String::from(NETSCAPE_HEADER);
    out.push('\n');
    for c in cookies {
        let include_subdomains = if c.domain.starts_with('.') { "TRUE" } else { "FALSE" };
        let secure = if c.secure { "TRUE" } else { "FALSE" };
        let expires = c.expiration_date.map(|e| e.max(0.0) as i64).unwrap_or(0);
        out.push_str(&format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\n",
            c.domain, include_subdomains, c.path, secure, expires, c.name, c.value
        ));
    }
    out
}

/// Keeps comments, drops lines with fewer than six fields and appends an empty
/// value to lines with exactly six.
fn repair_netscape(text: &str) -> String {
    let mut out = String::from(NETSCAPE_HEADER);
    out.push('\n');
    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        if line.starts_with('#') && !line.starts_with("#HttpOnly_") {
            if line.trim() != NETSCAPE_HEADER {
                out.push_str(line);
                out.push('\n');
            }
            continue;
        }

        let fields = line.split('\t').count();
        match fields {
            0..=5 => {
                tracing::debug!("[cookies] dropping malformed line with {} fields", fields);
            }
            6 => {
                out.push_str(line);
                out.push_str("\t\n");
            }
            _ => {
                out.push_str(line);
                out.push('\n');
            }
        }
    }
    out
}

/// Cookie file scoped to one task; removed when dropped, whatever the outcome.
pub struct EphemeralCookieFile {
    file: tempfile::NamedTempFile,
}

impl EphemeralCookieFile {
    pub fn create(source: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(source)
            .map_err(|e| anyhow!("Failed to read cookie file {:?}: {}", source, e))?;
        let normalized = normalize_cookie_text(&text)?;

        let mut file = tempfile::Builder::new()
            .prefix("medialoader-cookies-")
            .suffix(".txt")
            .tempfile()?;
        file.write_all(normalized.as_bytes())?;
        file.flush()?;
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn six_field_lines_get_empty_value() {
        let text = ".example.com\tTRUE\t/\tFALSE\t0\tsession\n";
        let out = normalize_cookie_text(text).unwrap();
        let line = out.lines().nth(1).unwrap();
        assert_eq!(line.split('\t').count(), 7);
        assert!(line.ends_with("session\t"));
    }

    #[test]
    fn short_lines_are_dropped() {
        let text = "# comment\n.example.com\tTRUE\t/\n.example.com\tTRUE\t/\tFALSE\t0\tname\tvalue\n";
        let out = normalize_cookie_text(text).unwrap();
        let cookies: Vec<&str> = out.lines().filter(|l| !l.starts_with('#')).collect();
        assert_eq!(cookies, vec![".example.com\tTRUE\t/\tFALSE\t0\tname\tvalue"]);
        assert!(out.contains("# comment"));
    }

    #[test]
    fn http_only_prefix_is_a_cookie_line() {
        let text = "#HttpOnly_.example.com\tTRUE\t/\tTRUE\t0\tsid\tabc\n";
        let out = normalize_cookie_text(text).unwrap();
        assert!(out.contains("#HttpOnly_.example.com\tTRUE"));
    }

    #[test]
    fn json_array_converted() {
        let json = r#"[
            {"domain": ".spotify.com", "path": "/", "secure": true,
             "expirationDate": 1767225600.5, "name": "sp_dc", "value": "xyz"},
            {"domain": "open.spotify.com", "name": "lang", "value": "de"}
        ]"#;
        let out = normalize_cookie_text(json).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], NETSCAPE_HEADER);
        assert_eq!(lines[1], ".spotify.com\tTRUE\t/\tTRUE\t1767225600\tsp_dc\txyz");
        assert_eq!(lines[2], "open.spotify.com\tFALSE\t/\tFALSE\t0\tlang\tde");
    }

    #[test]
    fn ephemeral_file_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("cookies.txt");
        std::fs::write(&source, ".a.com\tTRUE\t/\tFALSE\t0\tk\tv\n").unwrap();

        let cookie_file = EphemeralCookieFile::create(&source).unwrap();
        let path = cookie_file.path().to_path_buf();
        assert!(path.exists());
        drop(cookie_file);
        assert!(!path.exists());
    }
}
