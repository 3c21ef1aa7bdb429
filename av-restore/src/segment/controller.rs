//! Segment-level driver: plan, resume, render, finalize.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::probe::MediaProbe;
use crate::utils::fs;
use crate::{Error, Result};

use super::layout::{WorkLayout, concat_entry};
use super::marker::CompletionMarker;
use super::resume::{check_segment, plan_with_status, scan_resume_state};
use super::{Segment, SegmentEvent, plan_segments};

/// Renders one segment of the source into a single artifact file.
#[async_trait]
pub trait SegmentTransform: Send + Sync {
    /// Write the rendered slice to `target`.
    ///
    /// The frame directories of `layout` are empty on entry and may be used
    /// freely; they are purged again afterwards whatever the outcome.
    async fn render(
        &self,
        segment: &Segment,
        layout: &WorkLayout,
        target: &Path,
        cancel: &CancellationToken,
    ) -> Result<()>;
}

/// Joins finished segments and restores the source audio.
#[async_trait]
pub trait SegmentAssembler: Send + Sync {
    /// Losslessly concatenate the artifacts listed in `manifest` into `output`.
    async fn concat(&self, manifest: &Path, output: &Path, cancel: &CancellationToken) -> Result<()>;

    /// Combine the video of `video` with the audio of `audio_source` into `output`.
    async fn mux_audio(
        &self,
        video: &Path,
        audio_source: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<()>;
}

/// Outcome of [`SegmentController::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub planned: usize,
    pub skipped: usize,
    pub processed: usize,
}

/// Purges the per-segment scratch directories when dropped.
struct ScratchGuard<'a> {
    layout: &'a WorkLayout,
}

impl Drop for ScratchGuard<'_> {
    fn drop(&mut self) {
        fs::purge_dir_sync(self.layout.frames_dir());
        fs::purge_dir_sync(self.layout.frames_up_dir());
    }
}

pub struct SegmentController {
    layout: WorkLayout,
    probe: Arc<dyn MediaProbe>,
    transform: Arc<dyn SegmentTransform>,
    assembler: Arc<dyn SegmentAssembler>,
    events: Option<mpsc::UnboundedSender<SegmentEvent>>,
    cancel: CancellationToken,
}

impl SegmentController {
    pub fn new(
        layout: WorkLayout,
        probe: Arc<dyn MediaProbe>,
        transform: Arc<dyn SegmentTransform>,
        assembler: Arc<dyn SegmentAssembler>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            layout,
            probe,
            transform,
            assembler,
            events: None,
            cancel,
        }
    }

    /// Send progress events to `tx`.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<SegmentEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn layout(&self) -> &WorkLayout {
        &self.layout
    }

    fn emit(&self, event: SegmentEvent) {
        if let Some(tx) = &self.events {
            // The receiver going away only stops progress display.
            let _ = tx.send(event);
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Plan `[0, total)` and annotate each segment with its on-disk status.
    pub async fn plan(&self, total: f64, segment_length: u64) -> Result<Vec<Segment>> {
        plan_with_status(&self.layout, self.probe.as_ref(), total, segment_length).await
    }

    /// Render every segment of `[0, total)` that is not already complete.
    pub async fn run(&self, total: f64, segment_length: u64) -> Result<RunSummary> {
        let segments = plan_segments(total, segment_length)?;
        self.layout.prepare().await?;

        let stale = self.layout.remove_stale_parts().await?;
        if stale > 0 {
            info!(count = stale, "Removed partial segments from an interrupted run");
        }

        let resume = scan_resume_state(&self.layout, self.probe.as_ref(), segment_length).await?;
        self.emit(SegmentEvent::Planned {
            total: segments.len(),
            resume_index: resume.next_index,
        });

        let mut summary = RunSummary {
            planned: segments.len(),
            ..RunSummary::default()
        };

        for segment in &segments {
            self.check_cancelled()?;

            let verified = segment.index < resume.next_index
                || check_segment(
                    &self.layout,
                    self.probe.as_ref(),
                    segment.index,
                    segment.start,
                    segment.length,
                )
                .await?
                .is_some();

            if verified {
                debug!(segment = segment.index, "Segment already complete, skipping");
                self.emit(SegmentEvent::Skipped {
                    index: segment.index,
                });
                summary.skipped += 1;
                continue;
            }

            self.process_segment(segment).await?;
            summary.processed += 1;
        }

        info!(
            planned = summary.planned,
            skipped = summary.skipped,
            processed = summary.processed,
            "All segments rendered"
        );
        Ok(summary)
    }

    /// Render a single segment into its artifact.
    ///
    /// Output is written to the segment's `.part` path and only renamed into
    /// place after it has been probed; the completion marker follows the
    /// rename. On failure the partial file and scratch frames are removed.
    pub async fn process_segment(&self, segment: &Segment) -> Result<PathBuf> {
        let index = segment.index;
        let artifact = self.layout.artifact_path(index);
        let part = self.layout.part_path(index);
        let marker = self.layout.marker_path(index);

        fs::remove_file_if_exists(&marker).await?;
        fs::remove_file_if_exists(&part).await?;

        self.layout.purge_scratch().await?;
        let _scratch = ScratchGuard {
            layout: &self.layout,
        };

        self.emit(SegmentEvent::Started {
            index,
            start: segment.start,
            end: segment.end,
        });
        info!(segment = index, start = segment.start, end = segment.end, "Processing segment");

        let duration = match self.render_and_probe(segment, &part).await {
            Ok(d) => d,
            Err(e) => {
                if let Err(cleanup) = fs::remove_file_if_exists(&part).await {
                    warn!(segment = index, error = %cleanup, "Failed to remove partial segment");
                }
                return Err(e);
            }
        };

        fs::promote(&part, &artifact).await?;
        CompletionMarker::new(segment, duration)
            .store(&marker)
            .await?;

        info!(segment = index, duration, "Segment complete");
        self.emit(SegmentEvent::Completed { index, duration });
        Ok(artifact)
    }

    async fn render_and_probe(&self, segment: &Segment, part: &Path) -> Result<f64> {
        self.transform
            .render(segment, &self.layout, part, &self.cancel)
            .await?;

        match fs::file_len(part).await? {
            Some(len) if len > 0 => {}
            _ => {
                return Err(Error::Other(format!(
                    "segment {} render produced no output",
                    segment.index
                )));
            }
        }
        self.probe.duration(part).await
    }

    /// Concatenate all artifacts in index order and mux the source audio.
    ///
    /// `expected`, when known, is the number of planned segments; fewer
    /// verified artifacts is a [`Error::SegmentGap`].
    pub async fn finalize(
        &self,
        audio_source: &Path,
        output: &Path,
        expected: Option<u64>,
    ) -> Result<PathBuf> {
        self.check_cancelled()?;

        let indices = self.layout.artifact_indices().await?;
        if indices.is_empty() {
            return Err(Error::NoSegments {
                dir: self.layout.segments_dir().to_path_buf(),
            });
        }
        for (position, index) in indices.iter().enumerate() {
            if *index != position as u64 {
                return Err(Error::SegmentGap {
                    missing: position as u64,
                });
            }
        }
        let count = indices.len() as u64;
        if let Some(expected) = expected
            && count < expected
        {
            return Err(Error::SegmentGap { missing: count });
        }

        let mut manifest = String::new();
        for index in &indices {
            manifest.push_str(&concat_entry(&self.layout.artifact_path(*index)));
            manifest.push('\n');
        }
        let manifest_path = self.layout.concat_manifest();
        fs::write_atomic(&manifest_path, manifest.as_bytes()).await?;
        debug!(path = %manifest_path.display(), segments = indices.len(), "Wrote concat manifest");

        let joined = self.layout.concat_output();
        fs::remove_file_if_exists(&joined).await?;
        self.assembler
            .concat(&manifest_path, &joined, &self.cancel)
            .await?;

        fs::ensure_parent_dir(output).await?;
        let part = fs::part_path(output);
        fs::remove_file_if_exists(&part).await?;
        let muxed = self
            .assembler
            .mux_audio(&joined, audio_source, &part, &self.cancel)
            .await;
        if let Err(e) = muxed {
            let _ = fs::remove_file_if_exists(&part).await;
            return Err(e);
        }
        fs::promote(&part, output).await?;
        fs::remove_file_if_exists(&joined).await?;

        info!(output = %output.display(), segments = indices.len(), "Final output written");
        self.emit(SegmentEvent::Finalized {
            output: output.to_path_buf(),
            segments: indices.len(),
        });
        Ok(output.to_path_buf())
    }
}
