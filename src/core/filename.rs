use regex::Regex;
use std::sync::LazyLock;
use unicode_normalization::UnicodeNormalization;

static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

pub const MAX_COMPONENT_CHARS: usize = 200;
const FALLBACK_NAME: &str = "untitled";

/// Makes `name` usable as a single path component.
///
/// Strips characters that are illegal on common filesystems, collapses
/// whitespace, trims surrounding whitespace and periods and caps the result at
/// 200 code points.
pub fn sanitize_path_component(name: &str) -> String {
    let name: String = name.nfc().collect();
    let name: String = name
        .chars()
        .filter(|c| !c.is_control() && !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'))
        .collect();
    let name = WS_RE.replace_all(&name, " ");
    let name = trim_component(&name);

    let capped: String = name.chars().take(MAX_COMPONENT_CHARS).collect();
    let result = trim_component(&capped).to_string();

    if result.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        result
    }
}

fn trim_component(s: &str) -> &str {
    s.trim_matches(|c: char| c.is_whitespace() || c == '.')
}

/// File stem for an item: `"{artist} - {title}"`, or the title alone.
pub fn output_stem(artist: &str, title: &str) -> String {
    let display = if artist.trim().is_empty() {
        title.to_string()
    } else {
        format!("{} - {}", artist.trim(), title.trim())
    };
    sanitize_filename::sanitize(sanitize_path_component(&display))
}

/// Escapes literal text for use inside an extractor output template.
pub fn escape_template(text: &str) -> String {
    text.replace('%', "%%")
}

/// Comparison key for fuzzy stem matching: lowercase alphanumerics only.
pub fn stem_key(stem: &str) -> String {
    stem.nfc()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}
