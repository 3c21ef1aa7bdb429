//! Sidecar completion markers.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::utils::fs;
use crate::Result;

use super::Segment;

/// Written next to an artifact once it has been renamed into place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionMarker {
    pub index: u64,
    pub start: u64,
    pub length: u64,
    /// Duration of the artifact as probed right after it was written.
    pub duration: f64,
    pub completed_at: DateTime<Utc>,
}

impl CompletionMarker {
    pub fn new(segment: &Segment, duration: f64) -> Self {
        Self {
            index: segment.index,
            start: segment.start,
            length: segment.length,
            duration,
            completed_at: Utc::now(),
        }
    }

    /// Read a marker; a missing or unparsable file is `None`.
    pub async fn load(path: &Path) -> Result<Option<Self>> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(fs::io_error("reading", path, e)),
        };
        match serde_json::from_slice(&bytes) {
            Ok(marker) => Ok(Some(marker)),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Ignoring unreadable completion marker");
                Ok(None)
            }
        }
    }

    pub async fn store(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        fs::write_atomic(path, &json).await
    }

    /// Whether this marker describes the segment at `index` starting at `start`
    /// with nominal `length`.
    pub fn describes(&self, index: u64, start: u64, length: u64) -> bool {
        self.index == index && self.start == start && self.length == length
    }
}
