pub mod traits;

use serde::{Deserialize, Serialize};

/// Services the tool knows by domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    Spotify,
    YouTube,
    SoundCloud,
    Vimeo,
    Twitch,
    Dailymotion,
    Ard,
    Zdf,
    Arte,
    ThreeSat,
}

/// Static domain table. Order is part of the classification contract: the first
/// service whose domain matches the host wins.
const DOMAIN_TABLE: &[(Service, &[&str])] = &[
    (Service::Spotify, &["open.spotify.com", "play.spotify.com", "spotify.com", "spotify.link"]),
    (Service::YouTube, &["youtube.com", "youtu.be", "youtube-nocookie.com"]),
    (Service::SoundCloud, &["soundcloud.com", "on.soundcloud.com"]),
    (Service::Vimeo, &["vimeo.com"]),
    (Service::Twitch, &["twitch.tv"]),
    (Service::Dailymotion, &["dailymotion.com", "dai.ly"]),
    (Service::Ard, &["ardmediathek.de", "ard.de"]),
    (Service::Zdf, &["zdf.de"]),
    (Service::Arte, &["arte.tv"]),
    (Service::ThreeSat, &["3sat.de"]),
];

impl Service {
    pub fn from_url(url: &str) -> Option<Self> {
        let parsed = url::Url::parse(url).ok()?;
        let host = parsed.host_str()?.to_lowercase();
        Self::from_host(&host)
    }

    pub fn from_host(host: &str) -> Option<Self> {
        let host = host.trim_end_matches('.');
        DOMAIN_TABLE.iter().find_map(|(service, domains)| {
            domains
                .iter()
                .any(|d| host == *d || host.ends_with(&format!(".{}", d)))
                .then_some(*service)
        })
    }

    /// Catalog services list music but cannot serve media themselves.
    pub fn is_catalog(self) -> bool {
        matches!(self, Self::Spotify)
    }

    /// Name used as a directory segment.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Spotify => "Spotify",
            Self::YouTube => "YouTube",
            Self::SoundCloud => "SoundCloud",
            Self::Vimeo => "Vimeo",
            Self::Twitch => "Twitch",
            Self::Dailymotion => "Dailymotion",
            Self::Ard => "ARD Mediathek",
            Self::Zdf => "ZDF",
            Self::Arte => "ARTE",
            Self::ThreeSat => "3sat",
        }
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Spotify => "spotify",
            Self::YouTube => "youtube",
            Self::SoundCloud => "soundcloud",
            Self::Vimeo => "vimeo",
            Self::Twitch => "twitch",
            Self::Dailymotion => "dailymotion",
            Self::Ard => "ard",
            Self::Zdf => "zdf",
            Self::Arte => "arte",
            Self::ThreeSat => "3sat",
        };
        f.write_str(s)
    }
}
