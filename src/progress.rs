//! Progress events, the reporter that emits them, and cancellation.
//!
//! A run talks to its caller only through [`PipelineEvent`]s sent on an
//! unbounded channel. Delivery is fire-and-forget: a caller that dropped its
//! receiver simply stops hearing about the run.
//!
//! Percentages follow fixed bands per [`Stage`], so a progress bar can be
//! drawn without knowing the page count:
//!
//! | Stage | Percent |
//! |-------|---------|
//! | queued | 0 |
//! | Rasterizing | 10 |
//! | Recognizing | 30, then +60 × done / total |
//! | Assembling | 90 |
//! | CleaningUp | 95 |
//! | Done | 100 on success |

use crate::output::RunReport;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Pipeline state. Runs only ever move forward through these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    Idle,
    Rasterizing,
    Recognizing,
    Assembling,
    CleaningUp,
    Done,
}

impl Stage {
    const ALL: [Stage; 6] = [
        Stage::Idle,
        Stage::Rasterizing,
        Stage::Recognizing,
        Stage::Assembling,
        Stage::CleaningUp,
        Stage::Done,
    ];

    /// Percentage reported on entering this stage.
    pub fn band_start(self) -> u8 {
        match self {
            Stage::Idle => 0,
            Stage::Rasterizing => 10,
            Stage::Recognizing => 30,
            Stage::Assembling => 90,
            Stage::CleaningUp => 95,
            Stage::Done => 100,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::Rasterizing => "rasterizing",
            Stage::Recognizing => "recognizing",
            Stage::Assembling => "assembling",
            Stage::CleaningUp => "cleaning up",
            Stage::Done => "done",
        }
    }

    fn index(self) -> u8 {
        self as u8
    }

    fn from_index(i: u8) -> Stage {
        Self::ALL
            .get(usize::from(i))
            .copied()
            .unwrap_or(Stage::Done)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Message from a running pipeline to its caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PipelineEvent {
    /// Stage change or progress within a stage.
    Progress {
        stage: Stage,
        /// 0–100, never lower than the previous event's.
        percent: u8,
        status: String,
    },
    /// Final event of a run.
    Finished(RunReport),
}

/// Emits [`PipelineEvent`]s for one run.
///
/// Clamps percentages so the sequence never decreases and ignores stage
/// changes that would move backwards.
#[derive(Debug)]
pub struct ProgressReporter {
    tx: Option<mpsc::UnboundedSender<PipelineEvent>>,
    percent: AtomicU8,
    stage: AtomicU8,
}

impl ProgressReporter {
    pub fn new(tx: mpsc::UnboundedSender<PipelineEvent>) -> Self {
        Self {
            tx: Some(tx),
            percent: AtomicU8::new(0),
            stage: AtomicU8::new(Stage::Idle.index()),
        }
    }

    /// A reporter that only tracks state and sends nothing.
    pub fn silent() -> Self {
        Self {
            tx: None,
            percent: AtomicU8::new(0),
            stage: AtomicU8::new(Stage::Idle.index()),
        }
    }

    /// Reporter plus the receiving end of its channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Move to `stage` at the start of its band.
    pub fn enter(&self, stage: Stage, status: impl Into<String>) {
        self.update(stage, stage.band_start(), status);
    }

    /// Report `percent` within `stage`.
    pub fn update(&self, stage: Stage, percent: u8, status: impl Into<String>) {
        let prev_stage = self.stage.fetch_max(stage.index(), Ordering::SeqCst);
        if stage.index() < prev_stage {
            debug!("Ignoring backwards stage change {} → {}", Stage::from_index(prev_stage), stage);
            return;
        }
        let percent = percent.min(100);
        let prev = self.percent.fetch_max(percent, Ordering::SeqCst);
        self.send(PipelineEvent::Progress {
            stage,
            percent: prev.max(percent),
            status: status.into(),
        });
    }

    /// Recognition progress after `done` of `total` pages finished.
    pub fn recognition_progress(&self, done: usize, total: usize) {
        let start = Stage::Recognizing.band_start() as usize;
        let span = (Stage::Assembling.band_start() - Stage::Recognizing.band_start()) as usize;
        let percent = start + span * done / total.max(1);
        self.update(
            Stage::Recognizing,
            percent.min(Stage::Assembling.band_start() as usize) as u8,
            format!("Recognized page {done}/{total}"),
        );
    }

    /// Send the terminal event.
    pub fn finish(&self, report: RunReport) {
        self.send(PipelineEvent::Finished(report));
    }

    pub fn percent(&self) -> u8 {
        self.percent.load(Ordering::SeqCst)
    }

    pub fn stage(&self) -> Stage {
        Stage::from_index(self.stage.load(Ordering::SeqCst))
    }

    fn send(&self, event: PipelineEvent) {
        if let Some(tx) = &self.tx {
            // A dropped receiver is not an error.
            let _ = tx.send(event);
        }
    }
}

/// Shared flag asking a run to stop.
///
/// Checked between stages and before each page is dispatched; calls already
/// in flight are allowed to finish.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::UnboundedReceiver<PipelineEvent>) -> Vec<(Stage, u8)> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if let PipelineEvent::Progress { stage, percent, .. } = ev {
                out.push((stage, percent));
            }
        }
        out
    }

    #[test]
    fn bands_are_increasing() {
        let starts: Vec<u8> = Stage::ALL.iter().map(|s| s.band_start()).collect();
        assert!(starts.windows(2).all(|w| w[0] < w[1]), "{starts:?}");
    }

    #[test]
    fn percent_never_decreases() {
        let (reporter, mut rx) = ProgressReporter::channel();
        reporter.enter(Stage::Recognizing, "go");
        reporter.recognition_progress(3, 4);
        reporter.recognition_progress(1, 4);
        let events = drain(&mut rx);
        assert_eq!(events, vec![(Stage::Recognizing, 30), (Stage::Recognizing, 75), (Stage::Recognizing, 75)]);
    }

    #[test]
    fn recognition_band_ends_at_ninety() {
        let reporter = ProgressReporter::silent();
        reporter.recognition_progress(7, 7);
        assert_eq!(reporter.percent(), 90);
        reporter.recognition_progress(1, 0);
        assert_eq!(reporter.percent(), 90);
    }

    #[test]
    fn backwards_stage_is_ignored() {
        let (reporter, mut rx) = ProgressReporter::channel();
        reporter.enter(Stage::Assembling, "a");
        reporter.enter(Stage::Rasterizing, "r");
        assert_eq!(reporter.stage(), Stage::Assembling);
        assert_eq!(drain(&mut rx), vec![(Stage::Assembling, 90)]);
    }

    #[test]
    fn dropped_receiver_is_tolerated() {
        let (reporter, rx) = ProgressReporter::channel();
        drop(rx);
        reporter.enter(Stage::Rasterizing, "still fine");
        assert_eq!(reporter.percent(), 10);
    }

    #[test]
    fn cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
