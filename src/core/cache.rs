use crate::types::{ExportResult, ExportStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

const STATUS_SUFFIX: &str = ".status.json";

/// Process-wide cache directory for TIFF export bundles.
pub fn cache_root() -> ExportResult<PathBuf> {
    let dir = std::env::temp_dir().join("mapa");
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Separate subdirectory for GIF export bundles.
pub fn gif_cache_root() -> ExportResult<PathBuf> {
    let dir = std::env::temp_dir().join("mapa").join("gif");
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// One entry under the watched cache directory.
#[derive(Debug, Clone)]
struct CacheEntry {
    path: PathBuf,
    size: u64,
    modified: SystemTime,
}

/// Total size of a file or directory tree in bytes.
fn entry_size(path: &Path) -> u64 {
    let Ok(metadata) = fs::symlink_metadata(path) else {
        return 0;
    };
    if metadata.is_file() {
        return metadata.len();
    }
    let mut total = 0;
    if let Ok(children) = fs::read_dir(path) {
        for child in children.flatten() {
            total += entry_size(&child.path());
        }
    }
    total
}

fn list_entries(path: &Path) -> ExportResult<Vec<CacheEntry>> {
    let mut entries = Vec::new();
    for child in fs::read_dir(path)? {
        let child = child?;
        let child_path = child.path();
        let name = child_path.file_name().and_then(|n| n.to_str());
        // Status records are bookkeeping, not cached artifacts. Dot-prefixed
        // entries are staging directories of exports still being written and
        // must never be counted or evicted.
        if name
            .map(|n| n.ends_with(STATUS_SUFFIX) || n.starts_with('.'))
            .unwrap_or(false)
        {
            continue;
        }
        let modified = match child.metadata() {
            Ok(metadata) => metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            Err(e) => {
                log::warn!("skipping unreadable cache entry {}: {}", child_path.display(), e);
                continue;
            }
        };
        entries.push(CacheEntry {
            size: entry_size(&child_path),
            path: child_path,
            modified,
        });
    }
    Ok(entries)
}

/// Evict cached exports oldest-first until the directory fits the threshold.
///
/// Runs synchronously before each new export. Entries that cannot be removed
/// (e.g. permission errors) are skipped with a warning instead of aborting
/// the export. Returns the paths that were removed.
pub fn run_cleanup(path: &Path, threshold_bytes: u64) -> ExportResult<Vec<PathBuf>> {
    if !path.is_dir() {
        return Ok(Vec::new());
    }

    let mut entries = list_entries(path)?;
    let mut total: u64 = entries.iter().map(|e| e.size).sum();
    if total <= threshold_bytes {
        log::debug!(
            "cache at {} within threshold ({} <= {} bytes), nothing to clean",
            path.display(),
            total,
            threshold_bytes
        );
        return Ok(Vec::new());
    }

    log::info!(
        "cache at {} holds {} bytes, cleaning down to {} bytes",
        path.display(),
        total,
        threshold_bytes
    );

    entries.sort_by_key(|e| e.modified);

    let mut removed = Vec::new();
    for entry in entries {
        if total <= threshold_bytes {
            break;
        }
        let result = if entry.path.is_dir() {
            fs::remove_dir_all(&entry.path)
        } else {
            fs::remove_file(&entry.path)
        };
        match result {
            Ok(()) => {
                total = total.saturating_sub(entry.size);
                log::debug!("evicted cache entry {}", entry.path.display());
                removed.push(entry.path);
            }
            Err(e) => {
                log::warn!("could not evict {}: {}", entry.path.display(), e);
            }
        }
    }

    Ok(removed)
}

/// Place a completed artifact into the cache atomically.
///
/// Exports are staged under a temporary name first so that a concurrent
/// cleanup pass never observes a half-written entry.
pub fn publish(staged: &Path, target: &Path) -> ExportResult<()> {
    fs::rename(staged, target)?;
    Ok(())
}

/// Status record associated with a geometry fingerprint, distinguishing
/// "not started", "in progress", "failed" and "stale from a previous run".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRecord {
    pub status: ExportStatus,
    pub updated: DateTime<Utc>,
}

fn status_path(dir: &Path, fingerprint: &str) -> PathBuf {
    dir.join(format!("{}{}", fingerprint, STATUS_SUFFIX))
}

pub fn write_status(dir: &Path, fingerprint: &str, status: ExportStatus) -> ExportResult<()> {
    let record = StatusRecord {
        status,
        updated: Utc::now(),
    };
    let json = serde_json::to_string(&record)?;
    fs::write(status_path(dir, fingerprint), json)?;
    Ok(())
}

pub fn read_status(dir: &Path, fingerprint: &str) -> Option<StatusRecord> {
    let json = fs::read_to_string(status_path(dir, fingerprint)).ok()?;
    serde_json::from_str(&json).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, bytes: usize) -> PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(&vec![0u8; bytes]).unwrap();
        path
    }

    fn set_mtime(path: &Path, seconds_ago: u64) {
        let mtime = SystemTime::now() - std::time::Duration::from_secs(seconds_ago);
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(mtime).unwrap();
    }

    #[test]
    fn test_cleanup_noop_below_threshold() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "a.zip", 100);
        let removed = run_cleanup(dir.path(), 1000).unwrap();
        assert!(removed.is_empty());
        assert!(dir.path().join("a.zip").exists());
    }

    #[test]
    fn test_cleanup_removes_exactly_the_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let oldest = write_file(dir.path(), "oldest.zip", 400);
        let middle = write_file(dir.path(), "middle.zip", 400);
        let newest = write_file(dir.path(), "newest.zip", 400);
        set_mtime(&oldest, 300);
        set_mtime(&middle, 200);
        set_mtime(&newest, 100);

        let removed = run_cleanup(dir.path(), 800).unwrap();
        assert_eq!(removed, vec![oldest.clone()]);
        assert!(!oldest.exists());
        assert!(middle.exists());
        assert!(newest.exists());
        assert!(entry_size(dir.path()) <= 800);
    }

    #[test]
    fn test_cleanup_can_empty_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_file(dir.path(), "a.zip", 500);
        let b = write_file(dir.path(), "b.zip", 500);
        set_mtime(&a, 200);
        set_mtime(&b, 100);

        let removed = run_cleanup(dir.path(), 0).unwrap();
        assert_eq!(removed.len(), 2);
        assert!(!a.exists() && !b.exists());
    }

    #[test]
    fn test_cleanup_counts_directories() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("abc123");
        fs::create_dir(&bundle).unwrap();
        write_file(&bundle, "scene.tif", 600);
        let newer = write_file(dir.path(), "fresh.zip", 100);
        set_mtime(&newer, 1);

        // Directory bundles count with their recursive size and are evictable.
        let removed = run_cleanup(dir.path(), 200).unwrap();
        assert_eq!(removed, vec![bundle.clone()]);
        assert!(!bundle.exists());
        assert!(newer.exists());
    }

    #[test]
    fn test_cleanup_ignores_status_records() {
        let dir = tempfile::tempdir().unwrap();
        write_status(dir.path(), "abc123", ExportStatus::InProgress).unwrap();
        let removed = run_cleanup(dir.path(), 0).unwrap();
        assert!(removed.is_empty());
        assert_eq!(
            read_status(dir.path(), "abc123").unwrap().status,
            ExportStatus::InProgress
        );
    }

    #[test]
    fn test_cleanup_leaves_staging_directories_alone() {
        let dir = tempfile::tempdir().unwrap();
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(dir.path())
            .unwrap();
        write_file(staging.path(), "half_written.tif", 900);
        let finished = write_file(dir.path(), "finished.zip", 100);
        set_mtime(&finished, 100);

        // The staging tree neither counts toward the total nor gets evicted.
        let removed = run_cleanup(dir.path(), 500).unwrap();
        assert!(removed.is_empty());
        assert!(staging.path().join("half_written.tif").exists());
        assert!(finished.exists());

        let removed = run_cleanup(dir.path(), 0).unwrap();
        assert_eq!(removed, vec![finished.clone()]);
        assert!(staging.path().exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_cleanup_skips_unreadable_entries() {
        let dir = tempfile::tempdir().unwrap();
        // A dangling symlink makes metadata() fail for that entry.
        std::os::unix::fs::symlink(dir.path().join("gone"), dir.path().join("dangling")).unwrap();
        let old = write_file(dir.path(), "old.zip", 400);
        set_mtime(&old, 100);

        let removed = run_cleanup(dir.path(), 0).unwrap();
        assert_eq!(removed, vec![old.clone()]);
        assert!(!old.exists());
    }

    #[test]
    fn test_status_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_status(dir.path(), "abc123").is_none());
        write_status(dir.path(), "abc123", ExportStatus::Succeeded).unwrap();
        let record = read_status(dir.path(), "abc123").unwrap();
        assert_eq!(record.status, ExportStatus::Succeeded);
    }

    #[test]
    fn test_publish_renames_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let staged = write_file(dir.path(), ".staging.zip", 10);
        let target = dir.path().join("final.zip");
        publish(&staged, &target).unwrap();
        assert!(!staged.exists());
        assert!(target.exists());
    }
}
