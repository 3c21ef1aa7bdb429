//! Resume detection.
//!
//! Resume state is never stored; it is recomputed from the segments directory
//! at the start of every run.

use tracing::{debug, info};

use crate::probe::MediaProbe;
use crate::utils::fs;
use crate::{Error, Result};

use super::layout::WorkLayout;
use super::marker::CompletionMarker;
use super::{Segment, SegmentStatus, plan_segments};

/// Allowed difference between a marker's recorded duration and a fresh probe.
pub const DURATION_TOLERANCE: f64 = 0.5;

/// Where the next run should pick up.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResumeState {
    /// Start offset of the first segment that still needs work, seconds.
    pub next_offset: u64,
    pub next_index: u64,
    /// Contiguous run of verified segments starting at index 0.
    pub completed: Vec<u64>,
}

/// Completion check for one segment.
///
/// Returns the probed artifact duration when the segment has a marker
/// describing exactly this slice, a non-empty artifact, and a probed
/// duration that agrees with the marker. An artifact that cannot be probed
/// counts as incomplete.
pub async fn check_segment<P>(
    layout: &WorkLayout,
    probe: &P,
    index: u64,
    start: u64,
    length: u64,
) -> Result<Option<f64>>
where
    P: MediaProbe + ?Sized,
{
    let Some(marker) = CompletionMarker::load(&layout.marker_path(index)).await? else {
        return Ok(None);
    };
    if !marker.describes(index, start, length) {
        debug!(segment = index, "Completion marker does not match segment bounds");
        return Ok(None);
    }

    let artifact = layout.artifact_path(index);
    match fs::file_len(&artifact).await? {
        Some(len) if len > 0 => {}
        _ => {
            debug!(segment = index, "Artifact missing or empty");
            return Ok(None);
        }
    }

    let probed = match probe.duration(&artifact).await {
        Ok(d) => d,
        Err(Error::Cancelled) => return Err(Error::Cancelled),
        Err(e) => {
            debug!(segment = index, error = %e, "Artifact could not be probed");
            return Ok(None);
        }
    };

    if (probed - marker.duration).abs() > DURATION_TOLERANCE
        || probed > length as f64 + DURATION_TOLERANCE
    {
        debug!(
            segment = index,
            probed,
            recorded = marker.duration,
            "Artifact duration disagrees with completion marker"
        );
        return Ok(None);
    }
    Ok(Some(probed))
}

/// Walk segments from index 0 and stop at the first that fails [`check_segment`].
pub async fn scan_resume_state<P>(
    layout: &WorkLayout,
    probe: &P,
    segment_length: u64,
) -> Result<ResumeState>
where
    P: MediaProbe + ?Sized,
{
    let mut state = ResumeState::default();
    loop {
        let index = state.next_index;
        let checked = check_segment(layout, probe, index, state.next_offset, segment_length).await?;
        let Some(duration) = checked else {
            break;
        };
        debug!(segment = index, duration, "Segment verified");
        state.completed.push(index);
        state.next_offset += segment_length;
        state.next_index += 1;
    }

    if state.next_index > 0 {
        info!(
            completed = state.completed.len(),
            next_offset = state.next_offset,
            "Resuming from previous run"
        );
    }
    Ok(state)
}

/// Plan `[0, total)` and mark each segment that passes [`check_segment`].
pub async fn plan_with_status<P>(
    layout: &WorkLayout,
    probe: &P,
    total: f64,
    segment_length: u64,
) -> Result<Vec<Segment>>
where
    P: MediaProbe + ?Sized,
{
    let mut segments = plan_segments(total, segment_length)?;
    for segment in &mut segments {
        let done = check_segment(layout, probe, segment.index, segment.start, segment.length).await?;
        if done.is_some() {
            segment.status = SegmentStatus::Complete;
        }
    }
    Ok(segments)
}
