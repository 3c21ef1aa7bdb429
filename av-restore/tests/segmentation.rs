//! Resume and finalize behaviour of the segment controller, driven by fakes.
//!
//! The fake transform writes each segment's duration as text into its
//! artifact and the fake probe reads it back, so completion checks run
//! against real files without any external tool.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use av_restore::probe::{MediaInfo, MediaProbe};
use av_restore::process::Stage;
use av_restore::segment::{
    CompletionMarker, Segment, SegmentAssembler, SegmentController, SegmentEvent, SegmentTransform,
    WorkLayout,
};
use av_restore::utils::fs::count_files;
use av_restore::{Error, Result};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct TextProbe;

#[async_trait]
impl MediaProbe for TextProbe {
    async fn probe(&self, path: &Path) -> Result<MediaInfo> {
        Err(Error::probe(path, "only durations are available"))
    }

    async fn duration(&self, path: &Path) -> Result<f64> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::probe(path, e.to_string()))?;
        text.trim()
            .parse()
            .map_err(|_| Error::probe(path, "not a duration"))
    }
}

#[derive(Default)]
struct FakeTransform {
    rendered: Mutex<Vec<u64>>,
    fail_at: Option<u64>,
}

impl FakeTransform {
    fn failing_at(index: u64) -> Self {
        Self {
            fail_at: Some(index),
            ..Self::default()
        }
    }

    fn rendered(&self) -> Vec<u64> {
        self.rendered.lock().unwrap().clone()
    }
}

#[async_trait]
impl SegmentTransform for FakeTransform {
    async fn render(
        &self,
        segment: &Segment,
        layout: &WorkLayout,
        target: &Path,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        tokio::fs::write(layout.frames_dir().join("00000001.png"), b"frame").await?;
        self.rendered.lock().unwrap().push(segment.index);

        if self.fail_at == Some(segment.index) {
            // Leave a truncated file behind, as a crashed encoder would.
            tokio::fs::write(target, b"trunc").await?;
            return Err(Error::StageToolFailure {
                stage: Stage::Encode,
                tool: "ffmpeg".to_string(),
                status: "exit code 1".to_string(),
                stderr_tail: "broken frame".to_string(),
            });
        }
        tokio::fs::write(target, format!("{}", segment.duration())).await?;
        Ok(())
    }
}

/// Concat writes the manifest itself; mux copies it to the output.
struct ManifestAssembler;

#[async_trait]
impl SegmentAssembler for ManifestAssembler {
    async fn concat(&self, manifest: &Path, output: &Path, _cancel: &CancellationToken) -> Result<()> {
        tokio::fs::copy(manifest, output).await?;
        Ok(())
    }

    async fn mux_audio(
        &self,
        video: &Path,
        _audio_source: &Path,
        output: &Path,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        tokio::fs::copy(video, output).await?;
        Ok(())
    }
}

struct Fixture {
    _temp: TempDir,
    work: PathBuf,
    source: PathBuf,
    output: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let work = temp.path().join("work").join("tape");
        let source = temp.path().join("tape.avi");
        std::fs::write(&source, b"source").unwrap();
        let output = temp.path().join("out").join("tape_upscaled.mp4");
        Self {
            _temp: temp,
            work,
            source,
            output,
        }
    }

    fn layout(&self) -> WorkLayout {
        WorkLayout::new(&self.work)
    }

    fn controller(&self, transform: Arc<FakeTransform>) -> SegmentController {
        SegmentController::new(
            self.layout(),
            Arc::new(TextProbe),
            transform,
            Arc::new(ManifestAssembler),
            CancellationToken::new(),
        )
    }

    /// Artifact file names listed in the final output, in order.
    fn output_entries(&self) -> Vec<String> {
        std::fs::read_to_string(&self.output)
            .unwrap()
            .lines()
            .map(|line| {
                let path = line
                    .trim_start_matches("file '")
                    .trim_end_matches('\'');
                Path::new(path)
                    .file_name()
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect()
    }
}

#[tokio::test]
async fn renders_every_segment_and_concatenates_in_order() {
    let fx = Fixture::new();
    let transform = Arc::new(FakeTransform::default());
    let controller = fx.controller(transform.clone());

    let summary = controller.run(125.0, 60).await.unwrap();
    assert_eq!((summary.planned, summary.processed, summary.skipped), (3, 3, 0));
    assert_eq!(transform.rendered(), vec![0, 1, 2]);

    let layout = fx.layout();
    let last = CompletionMarker::load(&layout.marker_path(2))
        .await
        .unwrap()
        .unwrap();
    assert_eq!((last.start, last.length), (120, 60));
    assert!((last.duration - 5.0).abs() < 1e-9);

    controller
        .finalize(&fx.source, &fx.output, Some(3))
        .await
        .unwrap();
    assert_eq!(
        fx.output_entries(),
        vec!["segment_000000.mp4", "segment_000001.mp4", "segment_000002.mp4"]
    );
    assert!(!layout.concat_output().exists());
}

#[tokio::test]
async fn resumes_after_failed_segment() {
    let fx = Fixture::new();
    let layout = fx.layout();

    let failing = Arc::new(FakeTransform::failing_at(1));
    let err = fx.controller(failing.clone()).run(200.0, 60).await.unwrap_err();
    assert!(matches!(err, Error::StageToolFailure { stage: Stage::Encode, .. }));
    assert_eq!(failing.rendered(), vec![0, 1]);

    // The finished segment stays, the failed one leaves nothing behind.
    assert!(layout.marker_path(0).exists());
    assert!(!layout.part_path(1).exists());
    assert!(!layout.artifact_path(1).exists());
    assert_eq!(count_files(layout.frames_dir()).await.unwrap(), 0);

    let retry = Arc::new(FakeTransform::default());
    let controller = fx.controller(retry.clone());
    let summary = controller.run(200.0, 60).await.unwrap();
    assert_eq!(retry.rendered(), vec![1, 2, 3]);
    assert_eq!((summary.skipped, summary.processed), (1, 3));

    controller
        .finalize(&fx.source, &fx.output, Some(summary.planned as u64))
        .await
        .unwrap();
    assert_eq!(fx.output_entries().len(), 4);
}

#[tokio::test]
async fn second_run_is_a_no_op() {
    let fx = Fixture::new();

    let first = fx.controller(Arc::new(FakeTransform::default()));
    first.run(125.0, 60).await.unwrap();
    first.finalize(&fx.source, &fx.output, Some(3)).await.unwrap();
    let before = fx.output_entries();

    let transform = Arc::new(FakeTransform::default());
    let second = fx.controller(transform.clone());
    let summary = second.run(125.0, 60).await.unwrap();
    second.finalize(&fx.source, &fx.output, Some(3)).await.unwrap();

    assert!(transform.rendered().is_empty());
    assert_eq!(summary.skipped, 3);
    assert_eq!(fx.output_entries(), before);
}

#[tokio::test]
async fn unmarked_artifact_is_rendered_again() {
    let fx = Fixture::new();
    let layout = fx.layout();
    layout.prepare().await.unwrap();
    // Non-empty, but written by a run that crashed before its marker.
    tokio::fs::write(layout.artifact_path(0), b"60").await.unwrap();

    let transform = Arc::new(FakeTransform::default());
    fx.controller(transform.clone()).run(90.0, 60).await.unwrap();
    assert_eq!(transform.rendered(), vec![0, 1]);
}

#[tokio::test]
async fn stale_part_files_are_removed() {
    let fx = Fixture::new();
    let layout = fx.layout();
    layout.prepare().await.unwrap();
    tokio::fs::write(layout.part_path(5), b"junk").await.unwrap();

    fx.controller(Arc::new(FakeTransform::default()))
        .run(30.0, 60)
        .await
        .unwrap();
    assert!(!layout.part_path(5).exists());
}

#[tokio::test]
async fn finalize_without_segments_fails() {
    let fx = Fixture::new();
    fx.layout().prepare().await.unwrap();
    let err = fx
        .controller(Arc::new(FakeTransform::default()))
        .finalize(&fx.source, &fx.output, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoSegments { .. }));
    assert!(!fx.output.exists());
}

#[tokio::test]
async fn finalize_refuses_gaps() {
    let fx = Fixture::new();
    let controller = fx.controller(Arc::new(FakeTransform::default()));
    controller.run(180.0, 60).await.unwrap();
    tokio::fs::remove_file(fx.layout().artifact_path(1)).await.unwrap();

    let err = controller
        .finalize(&fx.source, &fx.output, Some(3))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SegmentGap { missing: 1 }));
}

#[tokio::test]
async fn finalize_refuses_missing_tail() {
    let fx = Fixture::new();
    let controller = fx.controller(Arc::new(FakeTransform::default()));
    controller.run(120.0, 60).await.unwrap();

    let err = controller
        .finalize(&fx.source, &fx.output, Some(3))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SegmentGap { missing: 2 }));
}

#[tokio::test]
async fn emits_progress_events() {
    let fx = Fixture::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let controller = fx
        .controller(Arc::new(FakeTransform::default()))
        .with_events(tx);

    controller.run(70.0, 60).await.unwrap();
    controller.finalize(&fx.source, &fx.output, Some(2)).await.unwrap();
    drop(controller);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    assert_eq!(
        events.first(),
        Some(&SegmentEvent::Planned {
            total: 2,
            resume_index: 0
        })
    );
    assert!(matches!(
        events.last(),
        Some(SegmentEvent::Finalized { segments: 2, .. })
    ));
    let completed = events
        .iter()
        .filter(|e| matches!(e, SegmentEvent::Completed { .. }))
        .count();
    assert_eq!(completed, 2);
}

#[tokio::test]
async fn cancelled_run_stops_before_rendering() {
    let fx = Fixture::new();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let transform = Arc::new(FakeTransform::default());
    let controller = SegmentController::new(
        fx.layout(),
        Arc::new(TextProbe),
        transform.clone(),
        Arc::new(ManifestAssembler),
        cancel,
    );

    let err = controller.run(125.0, 60).await.unwrap_err();
    assert!(err.is_cancelled());
    assert!(transform.rendered().is_empty());
}
