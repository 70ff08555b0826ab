use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

pub const DEFAULT_GROUP: u32 = 1;

/// One downloadable unit: a track, a video or an episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub title: String,
    /// Primary artist for music, uploader/channel for video.
    pub artist: String,
    pub collection_name: Option<String>,
    pub group_number: Option<u32>,
    pub sequence_number: Option<u32>,
    /// Zero when unknown.
    pub duration_seconds: f64,
    pub origin_url: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl Item {
    pub fn new(id: impl Into<String>, title: impl Into<String>, origin_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: String::new(),
            collection_name: None,
            group_number: None,
            sequence_number: None,
            duration_seconds: 0.0,
            origin_url: origin_url.into(),
            description: None,
        }
    }

    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = artist.into();
        self
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration_seconds = seconds.max(0.0);
        self
    }

    pub fn in_collection(mut self, name: impl Into<String>, group: Option<u32>, sequence: Option<u32>) -> Self {
        self.collection_name = Some(name.into());
        self.group_number = group;
        self.sequence_number = sequence;
        self
    }

    /// Items discovered by link scraping carry only an id until metadata is fetched.
    pub fn needs_metadata(&self) -> bool {
        self.title.trim().is_empty()
    }

    pub fn search_query(&self) -> String {
        format!("{} {}", self.artist, self.title).trim().to_string()
    }

    /// `"{artist} - {title}"`, or just the title when the artist is unknown.
    pub fn display_name(&self) -> String {
        if self.artist.trim().is_empty() {
            self.title.clone()
        } else {
            format!("{} - {}", self.artist, self.title)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Movie,
    SeriesEpisode,
    Plain,
}

/// Ordered, grouped set of items (album, playlist, series).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Collection {
    pub name: String,
    pub groups: BTreeMap<u32, Vec<Item>>,
}

impl Collection {
    /// Builds a collection from items in discovery order.
    ///
    /// Duplicate ids keep their first occurrence. Items without a group land in
    /// group 1; inside a group items are ordered by sequence number, with
    /// unnumbered items after the numbered ones in discovery order.
    pub fn from_items(name: impl Into<String>, items: Vec<Item>) -> Self {
        let mut seen = HashSet::new();
        let mut groups: BTreeMap<u32, Vec<Item>> = BTreeMap::new();

        for mut item in items {
            if !seen.insert(item.id.clone()) {
                continue;
            }
            let group = *item.group_number.get_or_insert(DEFAULT_GROUP);
            groups.entry(group).or_default().push(item);
        }

        for members in groups.values_mut() {
            members.sort_by_key(|i| i.sequence_number.unwrap_or(u32::MAX));
        }

        Self {
            name: name.into(),
            groups,
        }
    }

    pub fn len(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.groups.values().flatten()
    }

    pub fn into_items(self) -> Vec<Item> {
        self.groups.into_values().flatten().collect()
    }
}
