//! Archive of uploaded import files.
//!
//! Every file handed to the importer is copied to `{dataDir}/imports/` so an
//! audit entry can be traced back to the exact bytes that produced it.
//! Files past the retention window are pruned.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::util::{atomic_write_bytes, sanitize_filename};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Failed to create archive dir {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),

    #[error("Archive write failed: {0}")]
    Write(std::io::Error),
}

/// Store `bytes` as `{dir}/{timestamp}_{filename}`. Returns the written path.
pub fn archive_upload(
    dir: &Path,
    filename: &str,
    bytes: &[u8],
    uploaded_at: DateTime<Utc>,
) -> Result<PathBuf, ArchiveError> {
    if !dir.exists() {
        std::fs::create_dir_all(dir).map_err(|e| ArchiveError::CreateDir(dir.to_path_buf(), e))?;
    }

    let timestamp = uploaded_at.format("%Y%m%dT%H%M%S%.3fZ");
    let mut path = dir.join(format!("{}_{}", timestamp, sanitize_filename(filename)));
    // Two uploads of the same name in the same millisecond.
    let mut n = 1;
    while path.exists() {
        path = dir.join(format!("{}_{}_{}", timestamp, n, sanitize_filename(filename)));
        n += 1;
    }

    atomic_write_bytes(&path, bytes).map_err(ArchiveError::Write)?;
    Ok(path)
}

/// Delete archived files older than `retention_days`. Returns how many were
/// removed; unreadable entries are skipped.
pub fn prune_archives(dir: &Path, retention_days: u32) -> usize {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return 0,
    };

    let cutoff = Utc::now() - chrono::Duration::days(retention_days as i64);
    let cutoff_ts = cutoff.timestamp();

    let mut pruned = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let mtime = match path.metadata().and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(_) => continue,
        };
        let mtime_secs = mtime
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;

        if mtime_secs < cutoff_ts && std::fs::remove_file(&path).is_ok() {
            pruned += 1;
        }
    }
    if pruned > 0 {
        log::info!("Pruned {} archived import file(s) from {}", pruned, dir.display());
    }
    pruned
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ts: &str) -> DateTime<Utc> {
        ts.parse().unwrap()
    }

    #[test]
    fn test_archive_upload_writes_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let imports = dir.path().join("imports");

        let path = archive_upload(&imports, "usuarios 2025.xlsx", b"PK\x03\x04data", at("2025-03-01T10:11:12Z"))
            .expect("archived");

        assert_eq!(std::fs::read(&path).unwrap(), b"PK\x03\x04data");
        let name = path.file_name().unwrap().to_str().unwrap();
        assert_eq!(name, "20250301T101112.000Z_usuarios_2025.xlsx");
    }

    #[test]
    fn test_archive_upload_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let when = at("2025-03-01T10:11:12Z");
        let first = archive_upload(dir.path(), "users.xlsx", b"one", when).unwrap();
        let second = archive_upload(dir.path(), "users.xlsx", b"two", when).unwrap();

        assert_ne!(first, second);
        assert_eq!(std::fs::read(&first).unwrap(), b"one");
        assert_eq!(std::fs::read(&second).unwrap(), b"two");
    }

    #[test]
    fn test_prune_removes_old_keeps_recent() {
        let dir = tempfile::tempdir().unwrap();
        let recent = archive_upload(dir.path(), "recent.xlsx", b"new", Utc::now()).unwrap();
        let old = archive_upload(dir.path(), "old.xlsx", b"old", Utc::now()).unwrap();

        let old_time =
            std::time::SystemTime::now() - std::time::Duration::from_secs(120 * 24 * 3600);
        filetime::set_file_mtime(&old, filetime::FileTime::from_system_time(old_time))
            .expect("set mtime");

        assert_eq!(prune_archives(dir.path(), 90), 1);
        assert!(!old.exists());
        assert!(recent.exists());
    }

    #[test]
    fn test_prune_missing_dir_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(prune_archives(&dir.path().join("absent"), 30), 0);
    }
}
