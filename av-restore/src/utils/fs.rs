//! Filesystem helpers shared across modules.
//!
//! These helpers provide consistent error context (operation + path) and keep
//! the "write elsewhere, then rename into place" rule in one spot.

use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Convert an IO error into an application error with operation + path context.
pub fn io_error(op: &'static str, path: &Path, source: std::io::Error) -> Error {
    Error::io_path(op, path, source)
}

/// Ensure a directory exists, creating it (recursively) if needed.
pub async fn ensure_dir_all_with_op(op: &'static str, path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| io_error(op, path, e))
}

/// Ensure a directory exists, creating it (recursively) if needed.
pub async fn ensure_dir_all(path: &Path) -> Result<()> {
    ensure_dir_all_with_op("creating directory", path).await
}

/// Synchronous variant for startup code running before the runtime is busy.
pub fn ensure_dir_all_sync(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| io_error("creating directory", path, e))
}

/// Ensure the parent directory of a file path exists.
pub async fn ensure_parent_dir(path: &Path) -> Result<()> {
    let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(());
    };
    ensure_dir_all_with_op("creating parent directory", parent).await
}

/// Remove a file, treating "already gone" as success.
pub async fn remove_file_if_exists(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(io_error("removing file", path, e)),
    }
}

/// Delete everything inside `dir` and leave it empty (created if missing).
pub async fn purge_dir(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(io_error("purging directory", dir, e)),
    }
    ensure_dir_all_with_op("recreating directory", dir).await
}

/// Synchronous purge used from drop guards, errors are ignored.
pub fn purge_dir_sync(dir: &Path) {
    let _ = std::fs::remove_dir_all(dir);
    let _ = std::fs::create_dir_all(dir);
}

/// Size of a file in bytes, `None` if it does not exist.
pub async fn file_len(path: &Path) -> Result<Option<u64>> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
        Ok(_) => Ok(None),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_error("reading metadata of", path, e)),
    }
}

/// Count regular files in a directory.
pub async fn count_files(dir: &Path) -> Result<usize> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| io_error("listing", dir, e))?;
    let mut count = 0;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| io_error("listing", dir, e))?
    {
        if entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
            count += 1;
        }
    }
    Ok(count)
}

/// Rename `from` onto `to`, replacing any existing file.
pub async fn promote(from: &Path, to: &Path) -> Result<()> {
    tokio::fs::rename(from, to)
        .await
        .map_err(|e| io_error("renaming into place", to, e))
}

/// Write `contents` to a sibling temporary file and rename it onto `path`.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = sibling_with_suffix(path, ".tmp");
    tokio::fs::write(&tmp, contents)
        .await
        .map_err(|e| io_error("writing", &tmp, e))?;
    promote(&tmp, path).await
}

/// `dir/name.ext` -> `dir/name.part.ext`; files without an extension get `.part`.
pub fn part_path(path: &Path) -> PathBuf {
    match (path.file_stem(), path.extension()) {
        (Some(stem), Some(ext)) => path.with_file_name(format!(
            "{}.part.{}",
            stem.to_string_lossy(),
            ext.to_string_lossy()
        )),
        _ => sibling_with_suffix(path, ".part"),
    }
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn part_path_keeps_extension_last() {
        assert_eq!(
            part_path(Path::new("/out/movie.mp4")),
            PathBuf::from("/out/movie.part.mp4")
        );
        assert_eq!(
            part_path(Path::new("/out/movie")),
            PathBuf::from("/out/movie.part")
        );
    }

    #[tokio::test]
    async fn purge_dir_empties_and_recreates() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("frames");
        tokio::fs::create_dir_all(dir.join("nested")).await.unwrap();
        tokio::fs::write(dir.join("00000001.png"), b"x").await.unwrap();

        purge_dir(&dir).await.unwrap();

        assert!(dir.is_dir());
        assert_eq!(count_files(&dir).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn write_atomic_replaces_content() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("marker.json");
        write_atomic(&path, b"one").await.unwrap();
        write_atomic(&path, b"two").await.unwrap();

        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"two");
        assert!(!temp.path().join("marker.json.tmp").exists());
    }

    #[tokio::test]
    async fn remove_missing_file_is_ok() {
        let temp = TempDir::new().unwrap();
        let removed = remove_file_if_exists(&temp.path().join("nope")).await.unwrap();
        assert!(!removed);
    }

    #[tokio::test]
    async fn file_len_of_missing_file_is_none() {
        let temp = TempDir::new().unwrap();
        assert_eq!(file_len(&temp.path().join("nope")).await.unwrap(), None);
    }
}
