use std::path::{Path, PathBuf};

use medialoader_core::models::media::{Classification, Item, DEFAULT_GROUP};

use crate::core::filename::sanitize_path_component;
use crate::platforms::Service;

/// Classification implied by the item metadata alone.
pub fn classify(item: &Item) -> Classification {
    if item.collection_name.is_some() || item.group_number.is_some() {
        Classification::SeriesEpisode
    } else if Service::from_url(&item.origin_url).is_some() {
        Classification::Movie
    } else {
        Classification::Plain
    }
}

/// Pure layout computation; does not touch the filesystem.
pub fn destination_for(item: &Item, base_dir: &Path, classification: Classification) -> PathBuf {
    let service = Service::from_url(&item.origin_url);
    let mut dir = base_dir.to_path_buf();

    match classification {
        Classification::Plain => dir,
        Classification::Movie => {
            if let Some(service) = service {
                dir.push(service.display_name());
            }
            dir.push(sanitize_path_component(&item.title));
            dir
        }
        Classification::SeriesEpisode => {
            if let Some(service) = service {
                dir.push(service.display_name());
            }
            let collection = item
                .collection_name
                .as_deref()
                .filter(|c| !c.trim().is_empty())
                .unwrap_or(&item.title);
            dir.push(sanitize_path_component(collection));
            dir.push(format!("Group {}", item.group_number.unwrap_or(DEFAULT_GROUP)));
            dir
        }
    }
}

/// Destination directory plus the topmost directory this call had to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedDestination {
    pub dir: PathBuf,
    pub created_root: Option<PathBuf>,
}

/// Topmost ancestor of `dir` (inclusive) that does not exist yet.
fn first_missing_ancestor(dir: &Path) -> Option<PathBuf> {
    let mut missing = None;
    for ancestor in dir.ancestors() {
        if ancestor.as_os_str().is_empty() || ancestor.exists() {
            break;
        }
        missing = Some(ancestor.to_path_buf());
    }
    missing
}

pub async fn prepare_destination(
    item: &Item,
    base_dir: &Path,
    classification: Option<Classification>,
) -> anyhow::Result<PreparedDestination> {
    let classification = classification.unwrap_or_else(|| classify(item));
    let dir = destination_for(item, base_dir, classification);
    let created_root = first_missing_ancestor(&dir);

    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create {:?}: {}", dir, e))?;

    tracing::debug!(
        "[paths] {:?} -> {:?} (created {:?})",
        classification,
        dir,
        created_root
    );
    Ok(PreparedDestination { dir, created_root })
}

/// Derives the output directory for `item` and creates it when absent.
pub async fn resolve_path(
    item: &Item,
    base_dir: &Path,
    classification: Option<Classification>,
) -> anyhow::Result<PathBuf> {
    Ok(prepare_destination(item, base_dir, classification).await?.dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn episode() -> Item {
        Item::new("e1", "Folge 3", "https://www.zdf.de/serien/soko/folge-3-100.html")
            .in_collection("SOKO: Leipzig", Some(2), Some(3))
    }

    #[test]
    fn classification_from_metadata() {
        assert_eq!(classify(&episode()), Classification::SeriesEpisode);
        let movie = Item::new("m", "Film", "https://www.arte.tv/de/videos/123-000-A/film/");
        assert_eq!(classify(&movie), Classification::Movie);
        let plain = Item::new("p", "Clip", "https://unknown.example/clip");
        assert_eq!(classify(&plain), Classification::Plain);
    }

    #[test]
    fn layouts() {
        let base = Path::new("/media");
        assert_eq!(
            destination_for(&episode(), base, Classification::SeriesEpisode),
            PathBuf::from("/media/ZDF/SOKO Leipzig/Group 2")
        );

        let movie = Item::new("m", "Der Film.", "https://www.ardmediathek.de/video/x/y");
        assert_eq!(
            destination_for(&movie, base, Classification::Movie),
            PathBuf::from("/media/ARD Mediathek/Der Film")
        );

        let unknown = Item::new("u", "Home video", "https://example.org/v");
        assert_eq!(
            destination_for(&unknown, base, Classification::Movie),
            PathBuf::from("/media/Home video")
        );
        assert_eq!(destination_for(&unknown, base, Classification::Plain), base);
    }

    #[test]
    fn missing_group_defaults_to_one() {
        let item = Item::new("e", "Ep", "https://example.org/e").in_collection("Show", None, Some(1));
        assert_eq!(
            destination_for(&item, Path::new("/b"), Classification::SeriesEpisode),
            PathBuf::from("/b/Show/Group 1")
        );
    }

    #[tokio::test]
    async fn resolve_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let first = prepare_destination(&episode(), tmp.path(), None).await.unwrap();
        assert!(first.dir.is_dir());
        assert_eq!(first.created_root, Some(tmp.path().join("ZDF")));

        let second = prepare_destination(&episode(), tmp.path(), None).await.unwrap();
        assert_eq!(first.dir, second.dir);
        assert_eq!(second.created_root, None);

        let via_resolve = resolve_path(&episode(), tmp.path(), None).await.unwrap();
        assert_eq!(via_resolve, first.dir);
    }
}
