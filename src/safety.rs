//! Safety utilities to prevent accidental data loss.
//!
//! These checks validate the database paths before anything destructive
//! happens: the target of a regenerate run must actually be a SQLite
//! database (or a fresh path), and the source must exist.

use anyhow::{bail, Result};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// The 16-byte header every SQLite database file starts with.
const SQLITE_MAGIC: &[u8] = b"SQLite format 3\0";

/// Validates that a target path is safe to create or mutate.
///
/// Checks:
/// - The path must not be a directory
/// - The parent directory must exist
/// - An existing, non-empty file must be a SQLite database (refuses to
///   open and drop tables inside some unrelated file)
///
/// # Returns
/// * `Ok(())` if the target path is safe
/// * `Err` with a descriptive message if a check fails
pub fn validate_target_path(target: &Path) -> Result<()> {
    if target.is_dir() {
        bail!(
            "Safety check failed: target '{}' is a directory",
            target.display()
        );
    }

    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            bail!(
                "Safety check failed: directory '{}' does not exist",
                parent.display()
            );
        }
    }

    if target.exists() {
        let mut header = [0u8; 16];
        let read = File::open(target)
            .and_then(|mut f| f.read(&mut header))
            .unwrap_or(0);
        // an empty file is fine, SQLite initializes it on first write
        if read > 0 && (read < SQLITE_MAGIC.len() || &header[..] != SQLITE_MAGIC) {
            bail!(
                "Safety check failed: target '{}' exists but is not a SQLite database",
                target.display()
            );
        }
    }

    Ok(())
}

/// Validates that the source database exists; it is never created.
pub fn validate_source_path(source: &Path) -> Result<()> {
    if !source.is_file() {
        bail!(
            "Safety check failed: source database '{}' not found",
            source.display()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_target_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("tracks.db");
        assert!(validate_target_path(&target).is_ok());
    }

    #[test]
    fn test_target_directory_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = validate_target_path(dir.path());
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("is a directory"));
    }

    #[test]
    fn test_missing_parent_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nope").join("tracks.db");
        assert!(validate_target_path(&target).is_err());
    }

    #[test]
    fn test_non_sqlite_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("notes.txt");
        let mut f = std::fs::File::create(&target).unwrap();
        f.write_all(b"not a database at all").unwrap();
        let result = validate_target_path(&target);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("not a SQLite database"));
    }

    #[test]
    fn test_sqlite_file_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("real.db");
        {
            let conn = rusqlite::Connection::open(&target).unwrap();
            conn.execute_batch("CREATE TABLE t (x); INSERT INTO t VALUES (1);")
                .unwrap();
        }
        assert!(validate_target_path(&target).is_ok());
    }

    #[test]
    fn test_missing_source_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("tags.db");
        assert!(validate_source_path(&source).is_err());
    }
}
