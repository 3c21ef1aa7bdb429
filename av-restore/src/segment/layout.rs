//! On-disk layout of a job's work directory.
//!
//! ```text
//! <work_root>/<stem>/
//!   job.json
//!   frames/                     extracted frames of the segment in flight
//!   frames_up/                  upscaled frames of the segment in flight
//!   segments/
//!     segment_000000.mp4        finished artifact
//!     segment_000000.mp4.done   completion marker
//!     segment_000001.part.mp4   in-flight write
//!     concat.txt                concatenation manifest
//! ```

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::Result;
use crate::utils::fs;

const SEGMENT_PREFIX: &str = "segment_";
const SEGMENT_EXT: &str = "mp4";
const MARKER_SUFFIX: &str = ".done";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkLayout {
    root: PathBuf,
    frames: PathBuf,
    frames_up: PathBuf,
    segments: PathBuf,
}

impl WorkLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            frames: root.join("frames"),
            frames_up: root.join("frames_up"),
            segments: root.join("segments"),
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn frames_dir(&self) -> &Path {
        &self.frames
    }

    pub fn frames_up_dir(&self) -> &Path {
        &self.frames_up
    }

    pub fn segments_dir(&self) -> &Path {
        &self.segments
    }

    pub fn job_manifest(&self) -> PathBuf {
        self.root.join("job.json")
    }

    pub fn concat_manifest(&self) -> PathBuf {
        self.segments.join("concat.txt")
    }

    /// Intermediate file holding the concatenated video before muxing.
    pub fn concat_output(&self) -> PathBuf {
        self.root.join(format!("concat.{SEGMENT_EXT}"))
    }

    pub fn artifact_path(&self, index: u64) -> PathBuf {
        self.segments
            .join(format!("{SEGMENT_PREFIX}{index:06}.{SEGMENT_EXT}"))
    }

    pub fn part_path(&self, index: u64) -> PathBuf {
        fs::part_path(&self.artifact_path(index))
    }

    pub fn marker_path(&self, index: u64) -> PathBuf {
        let mut name = self.artifact_path(index).into_os_string();
        name.push(MARKER_SUFFIX);
        PathBuf::from(name)
    }

    /// Create every directory of the layout.
    pub async fn prepare(&self) -> Result<()> {
        for dir in [&self.root, &self.frames, &self.frames_up, &self.segments] {
            fs::ensure_dir_all(dir).await?;
        }
        Ok(())
    }

    /// Empty both frame directories.
    pub async fn purge_scratch(&self) -> Result<()> {
        fs::purge_dir(&self.frames).await?;
        fs::purge_dir(&self.frames_up).await
    }

    /// Delete in-flight `.part` files left behind by an interrupted run.
    pub async fn remove_stale_parts(&self) -> Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.segments).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(fs::io_error("listing", &self.segments, e)),
        };

        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| fs::io_error("listing", &self.segments, e))?
        {
            let path = entry.path();
            let is_part = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(SEGMENT_PREFIX) && n.contains(".part"));
            if is_part && fs::remove_file_if_exists(&path).await? {
                debug!(path = %path.display(), "Removed stale partial segment");
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Indices of finished-looking artifacts (ignores markers and parts), ascending.
    pub async fn artifact_indices(&self) -> Result<Vec<u64>> {
        let mut entries = match tokio::fs::read_dir(&self.segments).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(fs::io_error("listing", &self.segments, e)),
        };

        let mut indices = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| fs::io_error("listing", &self.segments, e))?
        {
            if let Some(index) = entry.file_name().to_str().and_then(parse_artifact_name) {
                indices.push(index);
            }
        }
        indices.sort_unstable();
        Ok(indices)
    }
}

/// `segment_000012.mp4` -> `Some(12)`.
fn parse_artifact_name(name: &str) -> Option<u64> {
    let digits = name
        .strip_prefix(SEGMENT_PREFIX)?
        .strip_suffix(SEGMENT_EXT)?
        .strip_suffix('.')?;
    if digits.len() != 6 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Quote a path for an ffmpeg concat demuxer `file` directive.
pub fn concat_entry(path: &Path) -> String {
    let escaped = path.to_string_lossy().replace('\'', r"'\''");
    format!("file '{escaped}'")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn segment_paths() {
        let layout = WorkLayout::new("/work/tape");
        assert_eq!(
            layout.artifact_path(7),
            PathBuf::from("/work/tape/segments/segment_000007.mp4")
        );
        assert_eq!(
            layout.part_path(7),
            PathBuf::from("/work/tape/segments/segment_000007.part.mp4")
        );
        assert_eq!(
            layout.marker_path(7),
            PathBuf::from("/work/tape/segments/segment_000007.mp4.done")
        );
    }

    #[test]
    fn artifact_names() {
        assert_eq!(parse_artifact_name("segment_000012.mp4"), Some(12));
        assert_eq!(parse_artifact_name("segment_000012.part.mp4"), None);
        assert_eq!(parse_artifact_name("segment_000012.mp4.done"), None);
        assert_eq!(parse_artifact_name("segment_12.mp4"), None);
        assert_eq!(parse_artifact_name("concat.txt"), None);
    }

    #[test]
    fn concat_entry_escapes_quotes() {
        assert_eq!(
            concat_entry(Path::new("/w/it's/segment_000000.mp4")),
            r"file '/w/it'\''s/segment_000000.mp4'"
        );
    }

    #[tokio::test]
    async fn lists_artifacts_and_removes_parts() {
        let temp = TempDir::new().unwrap();
        let layout = WorkLayout::new(temp.path().join("job"));
        layout.prepare().await.unwrap();

        for index in [2u64, 0, 1] {
            tokio::fs::write(layout.artifact_path(index), b"x").await.unwrap();
        }
        tokio::fs::write(layout.part_path(3), b"half").await.unwrap();
        tokio::fs::write(layout.marker_path(0), b"{}").await.unwrap();

        assert_eq!(layout.artifact_indices().await.unwrap(), vec![0, 1, 2]);
        assert_eq!(layout.remove_stale_parts().await.unwrap(), 1);
        assert!(!layout.part_path(3).exists());
        assert!(layout.marker_path(0).exists());
    }
}
