//! Terminal progress display for segment events.

use std::time::Duration;

use av_restore::segment::SegmentEvent;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const BAR_TEMPLATE: &str =
    "{spinner:.blue} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} segments {msg}";

/// Render events from `rx` until the sender side is dropped.
pub fn spawn_segment_progress(
    mut rx: mpsc::UnboundedReceiver<SegmentEvent>,
    enabled: bool,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let bar = if enabled {
            ProgressBar::new(0)
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) = ProgressStyle::with_template(BAR_TEMPLATE) {
            bar.set_style(style.progress_chars("=> "));
        }
        bar.enable_steady_tick(Duration::from_millis(120));

        while let Some(event) = rx.recv().await {
            match event {
                SegmentEvent::Planned {
                    total,
                    resume_index,
                } => {
                    bar.set_length(total as u64);
                    if resume_index > 0 {
                        bar.set_message(format!("(resuming at segment {resume_index})"));
                    }
                }
                SegmentEvent::Skipped { .. } => bar.inc(1),
                SegmentEvent::Started { index, start, end } => {
                    bar.set_message(format!("segment {index} [{start}s, {end:.1}s)"));
                }
                SegmentEvent::Completed { .. } => bar.inc(1),
                SegmentEvent::Finalized { output, segments } => {
                    bar.finish_with_message(format!(
                        "joined {segments} segments into {}",
                        output.display()
                    ));
                }
            }
        }
        if !bar.is_finished() {
            bar.abandon();
        }
    })
}

/// Spinner for operations without measurable progress.
pub fn spinner(message: &'static str, enabled: bool) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    pb.enable_steady_tick(Duration::from_millis(120));
    if let Ok(style) = ProgressStyle::with_template("{spinner:.blue} [{elapsed_precise}] {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb
}
