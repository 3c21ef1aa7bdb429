//! Resumable segmentation.
//!
//! A job's timeline is cut into fixed-length segments that are rendered and
//! persisted one by one under the work directory. Every finished segment gets
//! a completion marker, so an interrupted run picks up at the first segment
//! that is missing or fails validation.

pub mod controller;
pub mod layout;
pub mod marker;
pub mod resume;
pub mod upscale;

use std::path::PathBuf;

use serde::Serialize;

use crate::{Error, Result};

pub use controller::{RunSummary, SegmentAssembler, SegmentController, SegmentTransform};
pub use layout::WorkLayout;
pub use marker::CompletionMarker;
pub use resume::{ResumeState, check_segment, plan_with_status, scan_resume_state};
pub use upscale::{FfmpegAssembler, UpscaleTransform};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum SegmentStatus {
    Pending,
    InProgress,
    Complete,
}

/// A slice `[start, end)` of the job timeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segment {
    pub index: u64,
    /// Start offset in whole seconds.
    pub start: u64,
    /// Nominal length in seconds, the same for every segment of a job.
    pub length: u64,
    /// End offset, clamped to the total duration for the last segment.
    pub end: f64,
    pub status: SegmentStatus,
}

impl Segment {
    /// Actual covered duration, shorter than `length` only for the last segment.
    pub fn duration(&self) -> f64 {
        self.end - self.start as f64
    }
}

/// Partition `[0, total)` into segments of `length` seconds.
///
/// The last segment may be shorter; a zero-length trailing segment is never
/// produced.
pub fn plan_segments(total: f64, length: u64) -> Result<Vec<Segment>> {
    if !total.is_finite() || total <= 0.0 {
        return Err(Error::validation(format!(
            "total duration must be positive, got {total}"
        )));
    }
    if length == 0 {
        return Err(Error::validation("segment length must be greater than 0"));
    }

    let mut segments = Vec::new();
    let mut index = 0u64;
    let mut start = 0u64;
    while (start as f64) < total {
        segments.push(Segment {
            index,
            start,
            length,
            end: ((start + length) as f64).min(total),
            status: SegmentStatus::Pending,
        });
        start += length;
        index += 1;
    }
    Ok(segments)
}

/// Progress notifications emitted by [`SegmentController`].
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentEvent {
    Planned { total: usize, resume_index: u64 },
    Skipped { index: u64 },
    Started { index: u64, start: u64, end: f64 },
    Completed { index: u64, duration: f64 },
    Finalized { output: PathBuf, segments: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(125.0, 60, vec![(0, 60.0), (60, 120.0), (120, 125.0)])]
    #[case(120.0, 60, vec![(0, 60.0), (60, 120.0)])]
    #[case(59.5, 60, vec![(0, 59.5)])]
    #[case(10.2, 5, vec![(0, 5.0), (5, 10.0), (10, 10.2)])]
    fn tiles_timeline(#[case] total: f64, #[case] length: u64, #[case] expected: Vec<(u64, f64)>) {
        let plan = plan_segments(total, length).unwrap();
        let bounds: Vec<(u64, f64)> = plan.iter().map(|s| (s.start, s.end)).collect();
        assert_eq!(bounds, expected);
        for (i, seg) in plan.iter().enumerate() {
            assert_eq!(seg.index, i as u64);
            assert!(seg.duration() > 0.0);
        }
    }

    #[rstest]
    #[case(0.0, 60)]
    #[case(-1.0, 60)]
    #[case(f64::NAN, 60)]
    #[case(100.0, 0)]
    fn rejects_degenerate_input(#[case] total: f64, #[case] length: u64) {
        assert!(matches!(plan_segments(total, length), Err(Error::Validation(_))));
    }
}
