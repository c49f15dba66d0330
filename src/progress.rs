//! Progress reporting and cancellation
//!
//! Orchestrators push [`ProgressState`] updates to a caller-supplied
//! [`ProgressSink`]: any `FnMut(&ProgressState)` closure or a
//! [`ChannelSink`] feeding an mpsc receiver. Within one operation the
//! reported percent never decreases and reaches 100 only on `completed`.

use std::fmt;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Preparing,
    Collecting,
    Compressing,
    Encrypting,
    Uploading,
    Completed,
    Failed,
}

impl Stage {
    /// Whether the operation has ended
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Completed | Stage::Failed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Preparing => "preparing",
            Stage::Collecting => "collecting",
            Stage::Compressing => "compressing",
            Stage::Encrypting => "encrypting",
            Stage::Uploading => "uploading",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Snapshot of an operation's progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressState {
    pub stage: Stage,
    /// 0..=100
    pub percent: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_item: Option<String>,
}

/// Receiver of progress updates
pub trait ProgressSink {
    fn report(&mut self, state: &ProgressState);
}

impl<F> ProgressSink for F
where
    F: FnMut(&ProgressState),
{
    fn report(&mut self, state: &ProgressState) {
        self(state)
    }
}

/// Sink that forwards every update over an mpsc channel
#[derive(Debug, Clone)]
pub struct ChannelSink(pub Sender<ProgressState>);

impl ProgressSink for ChannelSink {
    fn report(&mut self, state: &ProgressState) {
        // A dropped receiver only means nobody is watching
        let _ = self.0.send(state.clone());
    }
}

/// Create a channel-backed sink and its receiving end
pub fn channel() -> (ChannelSink, Receiver<ProgressState>) {
    let (tx, rx) = mpsc::channel();
    (ChannelSink(tx), rx)
}

/// Caller-held cancellation flag, honored at file and chunk boundaries
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of the operation holding a clone of this token
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// `Break` once cancellation was requested, for chunk callbacks
    pub(crate) fn flow(&self) -> ControlFlow<()> {
        if self.is_cancelled() {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }
}

/// Overall percent range assigned to one stage
#[derive(Debug, Clone, Copy)]
pub(crate) struct StageSpan {
    pub stage: Stage,
    pub start: u8,
    pub end: u8,
}

/// Maps stage-local progress onto one monotonic percent stream
pub(crate) struct ProgressReporter<'a> {
    sink: &'a mut dyn ProgressSink,
    plan: Vec<StageSpan>,
    stage: Stage,
    percent: u8,
    last_item: Option<String>,
}

impl<'a> ProgressReporter<'a> {
    pub fn new(sink: &'a mut dyn ProgressSink, plan: Vec<StageSpan>) -> Self {
        Self {
            sink,
            plan,
            stage: Stage::Preparing,
            percent: 0,
            last_item: None,
        }
    }

    fn span(&self, stage: Stage) -> (u8, u8) {
        self.plan
            .iter()
            .find(|span| span.stage == stage)
            .map(|span| (span.start, span.end))
            .unwrap_or((self.percent, self.percent))
    }

    fn emit(&mut self, item: Option<String>) {
        let state = ProgressState {
            stage: self.stage,
            percent: self.percent,
            current_item: item,
        };
        self.sink.report(&state);
    }

    /// Start a stage
    pub fn enter(&mut self, stage: Stage) {
        let (start, _) = self.span(stage);
        self.stage = stage;
        self.percent = self.percent.max(start).min(99);
        self.last_item = None;
        tracing::debug!(%stage, percent = self.percent, "Entering stage");
        self.emit(None);
    }

    /// Report `done` of `total` units within the current stage
    pub fn advance(&mut self, done: u64, total: u64, item: Option<&str>) {
        let (start, end) = self.span(self.stage);
        let fraction = if total == 0 {
            1.0
        } else {
            (done.min(total) as f64) / (total as f64)
        };
        let scaled = start as f64 + (end.saturating_sub(start) as f64) * fraction;
        let percent = (scaled.floor() as u8).min(end).min(99).max(self.percent);

        let item_changed = item.is_some() && item != self.last_item.as_deref();
        if percent == self.percent && !item_changed {
            return;
        }

        self.percent = percent;
        if item_changed {
            self.last_item = item.map(str::to_string);
        }
        self.emit(item.map(str::to_string));
    }

    /// Terminal success
    pub fn complete(&mut self) {
        self.stage = Stage::Completed;
        self.percent = 100;
        self.emit(None);
    }

    /// Terminal failure, percent stays where it was
    pub fn fail(&mut self) {
        self.stage = Stage::Failed;
        self.emit(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> Vec<StageSpan> {
        vec![
            StageSpan { stage: Stage::Preparing, start: 0, end: 5 },
            StageSpan { stage: Stage::Collecting, start: 5, end: 50 },
            StageSpan { stage: Stage::Encrypting, start: 50, end: 99 },
        ]
    }

    #[test]
    fn test_percent_is_monotonic_and_ends_at_100() {
        let mut seen = Vec::new();
        let mut sink = |s: &ProgressState| seen.push(s.clone());
        {
            let mut reporter = ProgressReporter::new(&mut sink, plan());
            reporter.enter(Stage::Preparing);
            reporter.enter(Stage::Collecting);
            reporter.advance(1, 4, Some("a.json"));
            reporter.advance(0, 4, Some("b.json")); // never goes backwards
            reporter.advance(4, 4, None);
            reporter.enter(Stage::Encrypting);
            reporter.advance(10, 10, None);
            reporter.complete();
        }

        let percents: Vec<u8> = seen.iter().map(|s| s.percent).collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{:?}", percents);
        assert_eq!(seen.last().unwrap().stage, Stage::Completed);
        assert_eq!(seen.last().unwrap().percent, 100);
        assert!(seen[..seen.len() - 1].iter().all(|s| s.percent < 100));
        assert!(seen.iter().any(|s| s.current_item.as_deref() == Some("b.json")));
    }

    #[test]
    fn test_fail_keeps_percent() {
        let mut seen = Vec::new();
        let mut sink = |s: &ProgressState| seen.push(s.clone());
        {
            let mut reporter = ProgressReporter::new(&mut sink, plan());
            reporter.enter(Stage::Collecting);
            reporter.advance(2, 2, None);
            reporter.fail();
        }
        let last = seen.last().unwrap();
        assert_eq!(last.stage, Stage::Failed);
        assert_eq!(last.percent, 50);
    }

    #[test]
    fn test_duplicate_updates_suppressed() {
        let mut count = 0;
        let mut sink = |_: &ProgressState| count += 1;
        {
            let mut reporter = ProgressReporter::new(&mut sink, plan());
            reporter.enter(Stage::Collecting);
            for _ in 0..100 {
                reporter.advance(0, 1_000_000, None);
            }
        }
        assert_eq!(count, 1);
    }

    #[test]
    fn test_channel_sink() {
        let (mut sink, rx) = channel();
        sink.report(&ProgressState {
            stage: Stage::Uploading,
            percent: 90,
            current_item: None,
        });
        drop(sink);
        let received: Vec<_> = rx.iter().collect();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].stage, Stage::Uploading);
    }

    #[test]
    fn test_cancel_token_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_stage_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Stage::Uploading).unwrap(), "\"uploading\"");
        assert!(Stage::Failed.is_terminal());
        assert!(!Stage::Encrypting.is_terminal());
    }
}
