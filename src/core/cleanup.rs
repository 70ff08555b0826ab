use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

const TEMP_EXTENSIONS: &[&str] = &["part", "ytdl", "temp", "tmp", "frag", "partial"];

#[derive(Debug, Clone, Copy)]
pub struct CleanupPolicy {
    pub min_bytes: u64,
    pub recent: Duration,
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        Self {
            min_bytes: 1024,
            recent: Duration::from_secs(5),
        }
    }
}

/// What a cancelled task left behind and where.
#[derive(Debug, Clone)]
pub struct CancelledOutput<'a> {
    pub dir: &'a Path,
    pub stem: &'a str,
    pub started_at: SystemTime,
    /// Topmost directory the task created; removed when it ends up empty.
    pub created_root: Option<&'a Path>,
}

#[derive(Debug, Default)]
pub struct CleanupReport {
    pub removed_files: Vec<PathBuf>,
    pub removed_dirs: Vec<PathBuf>,
}

pub fn is_temp_artifact(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if name.contains(".part-frag") || name.contains(".part.") {
        return true;
    }
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .is_some_and(|ext| TEMP_EXTENSIONS.contains(&ext.as_str()))
}

/// True for `"{stem}.{ext}"` and the format or temp variants the extractor
/// derives from it, such as `"{stem}.f137.mp4"` or `"{stem}.mp3.part"`.
fn is_task_output(path: &Path, stem: &str) -> bool {
    if stem.is_empty() {
        return false;
    }
    let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return false;
    };
    let Some(rest) = name.strip_prefix(stem).and_then(|r| r.strip_prefix('.')) else {
        return false;
    };
    !rest.is_empty()
        && rest.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        })
}

/// Removes partial output of a cancelled task, then prunes directories the
/// task created if they are empty. Failures are logged, never returned.
pub fn reconcile_cancelled(output: &CancelledOutput<'_>, policy: CleanupPolicy) -> CleanupReport {
    let mut report = CleanupReport::default();
    let now = SystemTime::now();

    let entries = match std::fs::read_dir(output.dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("[cleanup] cannot list {:?}: {}", output.dir, e);
            return report;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(meta) = entry.metadata() else { continue };
        if !meta.is_file() {
            continue;
        }
        if !is_task_output(&path, output.stem) {
            continue;
        }

        // Size and age only matter for files this run touched; anything older
        // is finished output from an earlier run.
        let modified = meta.modified().ok();
        let touched = modified.is_some_and(|m| m >= output.started_at);
        let recent = modified
            .and_then(|m| now.duration_since(m).ok())
            .is_some_and(|age| age <= policy.recent);
        let small = meta.len() < policy.min_bytes;

        if is_temp_artifact(&path) || (touched && (small || recent)) {
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    tracing::debug!("[cleanup] removed {:?}", path);
                    report.removed_files.push(path);
                }
                Err(e) => tracing::warn!("[cleanup] failed to remove {:?}: {}", path, e),
            }
        }
    }

    if let Some(root) = output.created_root {
        prune_empty_dirs(output.dir, root, &mut report);
    }
    report
}

fn prune_empty_dirs(dir: &Path, root: &Path, report: &mut CleanupReport) {
    if !dir.starts_with(root) {
        return;
    }
    for current in dir.ancestors() {
        let empty = std::fs::read_dir(current)
            .map(|mut it| it.next().is_none())
            .unwrap_or(false);
        if !empty {
            break;
        }
        if let Err(e) = std::fs::remove_dir(current) {
            tracing::warn!("[cleanup] failed to remove directory {:?}: {}", current, e);
            break;
        }
        report.removed_dirs.push(current.to_path_buf());
        if current == root {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;

    fn write(path: &Path, size: usize) {
        std::fs::write(path, vec![0u8; size]).unwrap();
    }

    fn age(path: &Path, secs: i64) {
        let t = FileTime::from_unix_time(FileTime::now().unix_seconds() - secs, 0);
        filetime::set_file_mtime(path, t).unwrap();
    }

    #[test]
    fn temp_extensions_recognized() {
        assert!(is_temp_artifact(Path::new("a - b.mp3.part")));
        assert!(is_temp_artifact(Path::new("a.f137.mp4.ytdl")));
        assert!(is_temp_artifact(Path::new("a.mp4.part-Frag12")));
        assert!(!is_temp_artifact(Path::new("a.mp3")));
    }

    #[test]
    fn removes_partials_and_created_dirs() {
        let base = tempfile::tempdir().unwrap();
        let root = base.path().join("ARTE");
        let dir = root.join("Film");
        std::fs::create_dir_all(&dir).unwrap();
        let started = SystemTime::now() - Duration::from_secs(1);

        write(&dir.join("Film.mp4.part"), 50_000);
        write(&dir.join("Film.f140.m4a"), 10);

        let report = reconcile_cancelled(
            &CancelledOutput {
                dir: &dir,
                stem: "Film",
                started_at: started,
                created_root: Some(&root),
            },
            CleanupPolicy::default(),
        );

        assert_eq!(report.removed_files.len(), 2);
        assert!(!root.exists());
        assert!(base.path().exists());
    }

    #[test]
    fn keeps_unrelated_and_completed_files() {
        let dir = tempfile::tempdir().unwrap();
        let started = SystemTime::now();

        let finished = dir.path().join("Other Artist - Song.mp3");
        write(&finished, 10);
        age(&finished, 600);

        let complete_same_stem = dir.path().join("Band - Track.webm");
        write(&complete_same_stem, 4096);
        age(&complete_same_stem, 600);

        let partial = dir.path().join("Band - Track.mp3.part");
        write(&partial, 4096);

        let report = reconcile_cancelled(
            &CancelledOutput {
                dir: dir.path(),
                stem: "Band - Track",
                started_at: started,
                created_root: None,
            },
            CleanupPolicy::default(),
        );

        assert_eq!(report.removed_files, vec![partial]);
        assert!(finished.exists());
        assert!(complete_same_stem.exists());
        assert!(report.removed_dirs.is_empty());
    }

    #[test]
    fn sibling_with_longer_title_is_not_task_output() {
        let dir = tempfile::tempdir().unwrap();
        let started = SystemTime::now() - Duration::from_secs(2);

        let live = dir.path().join("Band - Song (Live).mp3");
        write(&live, 5_000_000);
        let partial = dir.path().join("Band - Song.mp3.part");
        write(&partial, 4096);

        let report = reconcile_cancelled(
            &CancelledOutput {
                dir: dir.path(),
                stem: "Band - Song",
                started_at: started,
                created_root: None,
            },
            CleanupPolicy::default(),
        );

        assert_eq!(report.removed_files, vec![partial]);
        assert!(live.exists());
    }

    #[test]
    fn small_output_from_earlier_run_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let earlier = dir.path().join("Band - Song.en.vtt");
        write(&earlier, 200);
        age(&earlier, 600);

        let report = reconcile_cancelled(
            &CancelledOutput {
                dir: dir.path(),
                stem: "Band - Song",
                started_at: SystemTime::now(),
                created_root: None,
            },
            CleanupPolicy::default(),
        );

        assert!(report.removed_files.is_empty());
        assert!(earlier.exists());
    }

    #[test]
    fn task_output_names() {
        assert!(is_task_output(Path::new("Band - Song.mp3"), "Band - Song"));
        assert!(is_task_output(Path::new("Band - Song.f137.mp4"), "Band - Song"));
        assert!(is_task_output(Path::new("Band - Song.mp4.part-Frag3"), "Band - Song"));
        assert!(!is_task_output(Path::new("Band - Song (Live).mp3"), "Band - Song"));
        assert!(!is_task_output(Path::new("Band - Songbird.mp3"), "Band - Song"));
        assert!(!is_task_output(Path::new("Band - Song."), "Band - Song"));
    }

    #[test]
    fn non_empty_created_dir_survives() {
        let base = tempfile::tempdir().unwrap();
        let dir = base.path().join("Show").join("Group 1");
        std::fs::create_dir_all(&dir).unwrap();
        let keep = dir.join("notes.txt");
        write(&keep, 4096);
        age(&keep, 600);

        reconcile_cancelled(
            &CancelledOutput {
                dir: &dir,
                stem: "Episode",
                started_at: SystemTime::now(),
                created_root: Some(&base.path().join("Show")),
            },
            CleanupPolicy::default(),
        );
        assert!(keep.exists());
    }
}
