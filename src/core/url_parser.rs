use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

use crate::platforms::Service;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    Track,
    Album,
    Playlist,
    Artist,
    Video,
    Channel,
    Series,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkClass {
    Single,
    Collection,
    ArtistOrChannel,
}

impl LinkKind {
    pub fn class(self) -> LinkClass {
        match self {
            Self::Track | Self::Video => LinkClass::Single,
            Self::Album | Self::Playlist | Self::Series => LinkClass::Collection,
            Self::Artist | Self::Channel => LinkClass::ArtistOrChannel,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedLink {
    pub service: Service,
    pub kind: LinkKind,
    pub id: String,
    pub url: String,
}

struct LinkPattern {
    service: Service,
    kind: LinkKind,
    re: Regex,
}

fn pattern(service: Service, kind: LinkKind, re: &str) -> LinkPattern {
    LinkPattern {
        service,
        kind,
        re: Regex::new(re).unwrap(),
    }
}

/// Ordered pattern table, matched against `host/path?query` with the locale
/// segment removed. First match wins; do not reorder.
static PATTERNS: LazyLock<Vec<LinkPattern>> = LazyLock::new(|| {
    use LinkKind::*;
    use Service::*;
    vec![
        pattern(Spotify, Track, r"^(?:open|play)\.spotify\.com/track/([A-Za-z0-9]+)"),
        pattern(Spotify, Album, r"^(?:open|play)\.spotify\.com/album/([A-Za-z0-9]+)"),
        pattern(Spotify, Playlist, r"^(?:open|play)\.spotify\.com/(?:user/[^/]+/)?playlist/([A-Za-z0-9]+)"),
        pattern(Spotify, Artist, r"^(?:open|play)\.spotify\.com/artist/([A-Za-z0-9]+)"),
        pattern(YouTube, Playlist, r"^(?:www\.|m\.|music\.)?youtube\.com/playlist\?(?:.*&)?list=([\w-]+)"),
        pattern(YouTube, Video, r"^(?:www\.|m\.|music\.)?youtube\.com/watch\?(?:.*&)?v=([\w-]{11})"),
        pattern(YouTube, Video, r"^(?:www\.|m\.)?youtube\.com/(?:shorts|embed|live)/([\w-]{11})"),
        pattern(YouTube, Video, r"^youtu\.be/([\w-]{11})"),
        pattern(YouTube, Channel, r"^(?:www\.|m\.)?youtube\.com/(@[\w.-]+)"),
        pattern(YouTube, Channel, r"^(?:www\.|m\.)?youtube\.com/(?:channel|c|user)/([\w-]+)"),
        pattern(SoundCloud, Playlist, r"^(?:www\.|m\.)?soundcloud\.com/([\w-]+/sets/[\w-]+)"),
        pattern(SoundCloud, Track, r"^(?:www\.|m\.)?soundcloud\.com/((?:[\w-]+)/(?:[\w-]+))/?(?:\?|$)"),
        pattern(SoundCloud, Artist, r"^(?:www\.|m\.)?soundcloud\.com/([\w-]+)/?(?:\?|$)"),
        pattern(Vimeo, Video, r"^(?:www\.|player\.)?vimeo\.com/(?:video/)?(\d+)"),
        pattern(Twitch, Video, r"^(?:www\.)?twitch\.tv/videos/(\d+)"),
        pattern(Dailymotion, Video, r"^(?:www\.)?dailymotion\.com/video/([A-Za-z0-9]+)"),
        pattern(Ard, Series, r"^(?:www\.)?ardmediathek\.de/(?:sendung|serie)/[^/]+/([A-Za-z0-9_-]+)"),
        pattern(Ard, Video, r"^(?:www\.)?ardmediathek\.de/video/(?:[^/]+/)*([A-Za-z0-9_-]+)/?(?:\?|$)"),
        pattern(Arte, Series, r"^(?:www\.)?arte\.tv/videos/(RC-\d+)"),
        pattern(Arte, Video, r"^(?:www\.)?arte\.tv/videos/(\d{6}-\d{3}-[A-Z])"),
        pattern(Zdf, Series, r"^(?:www\.)?zdf\.de/(?:serien|dokumentation|show)/([\w-]+)/?(?:\?|$)"),
        pattern(Zdf, Video, r"^(?:www\.)?zdf\.de/(?:[\w-]+/)+([\w-]+)\.html"),
        pattern(ThreeSat, Video, r"^(?:www\.)?3sat\.de/(?:[\w-]+/)+([\w-]+)\.html"),
    ]
});

static SPOTIFY_URI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^spotify:(track|album|playlist|artist):([A-Za-z0-9]+)$").unwrap());

/// Locale infixes such as `/intl-de/`, `/de-DE/` or `/en_US/`.
static LOCALE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/(?:intl-[a-z]{2}|[a-z]{2}[-_][A-Za-z]{2})/").unwrap());
/// Bare language segment (`/de/`), only meaningful on [`BARE_LOCALE_HOSTS`].
static BARE_LOCALE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^/[a-z]{2}/").unwrap());

/// Hosts whose first path segment is a bare language code. Elsewhere a
/// two-letter segment is a real name (`soundcloud.com/dj/...`).
const BARE_LOCALE_HOSTS: &[&str] = &["arte.tv"];

/// Classifies `url`. `None` means "not recognized" and is terminal for that URL.
pub fn resolve(url: &str) -> Option<ParsedLink> {
    let url = url.trim();

    if let Some(caps) = SPOTIFY_URI_RE.captures(url) {
        let kind = match &caps[1] {
            "track" => LinkKind::Track,
            "album" => LinkKind::Album,
            "playlist" => LinkKind::Playlist,
            _ => LinkKind::Artist,
        };
        let id = caps[2].to_string();
        return Some(ParsedLink {
            service: Service::Spotify,
            kind,
            url: format!("https://open.spotify.com/{}/{}", &caps[1], id),
            id,
        });
    }

    let key = match_key(url)?;
    PATTERNS.iter().find_map(|p| {
        let caps = p.re.captures(&key)?;
        Some(ParsedLink {
            service: p.service,
            kind: p.kind,
            id: caps.get(1)?.as_str().to_string(),
            url: url.to_string(),
        })
    })
}

fn uses_bare_locale(host: &str) -> bool {
    BARE_LOCALE_HOSTS
        .iter()
        .any(|h| host == *h || host.ends_with(&format!(".{}", h)))
}

/// Removes a leading locale path segment, keeping everything else intact.
pub fn normalize_locale(host: &str, path: &str) -> String {
    let found = LOCALE_RE.find(path).or_else(|| {
        uses_bare_locale(host)
            .then(|| BARE_LOCALE_RE.find(path))
            .flatten()
    });
    match found {
        Some(m) if path.len() > m.end() => format!("/{}", &path[m.end()..]),
        _ => path.to_string(),
    }
}

fn match_key(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    let host = parsed.host_str()?.to_lowercase();
    let path = normalize_locale(&host, parsed.path());
    let mut key = format!("{}{}", host, path);
    if let Some(query) = parsed.query() {
        key.push('?');
        key.push_str(query);
    }
    Some(key)
}
