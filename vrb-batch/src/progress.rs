//! Multi-lane progress display
//!
//! One lane per active job. Stage 1 reports percentages which are scaled to
//! the lane total; stage 2 reports ticks that add one unit each. A lane never
//! moves backwards and never passes its total.

use crate::workflow::JobId;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use tracing::debug;
use tracing_subscriber::fmt::MakeWriter;
use vrb_common::{JobEvent, ProgressEvent, Stage};

/// Units per lane; separation percentages scale to the full lane
pub const LANE_TOTAL: u64 = 160;

const LANE_TEMPLATE: &str = "{bar:40.cyan/blue}| {percent}% || [{msg}] {prefix}";

/// Position of a single lane
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaneCounter {
    position: u64,
    total: u64,
}

impl LaneCounter {
    pub fn new(total: u64) -> Self {
        Self { position: 0, total }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Apply one event and return the new position
    ///
    /// `Absolute(pct)` maps to `pct * total / 100` (rounded down).
    pub fn apply(&mut self, event: ProgressEvent) -> u64 {
        let target = match event {
            ProgressEvent::Absolute(pct) => u64::from(pct.min(100)) * self.total / 100,
            ProgressEvent::Increment => self.position.saturating_add(1),
        };
        self.position = self.position.max(target).min(self.total);
        self.position
    }

    /// Jump to the total
    pub fn complete(&mut self) -> u64 {
        self.position = self.total;
        self.position
    }
}

struct Lane {
    bar: ProgressBar,
    counter: LaneCounter,
}

/// Set of progress lanes drawn together
pub struct ProgressBoard {
    multi: MultiProgress,
    style: ProgressStyle,
    lanes: HashMap<JobId, Lane>,
}

impl ProgressBoard {
    /// Board drawing to the terminal (stderr)
    pub fn new() -> Self {
        Self::with_target(ProgressDrawTarget::stderr())
    }

    /// Board that tracks lanes without drawing anything
    pub fn hidden() -> Self {
        Self::with_target(ProgressDrawTarget::hidden())
    }

    fn with_target(target: ProgressDrawTarget) -> Self {
        let style = ProgressStyle::with_template(LANE_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓░");
        Self {
            multi: MultiProgress::with_draw_target(target),
            style,
            lanes: HashMap::new(),
        }
    }

    /// Create the lane for a newly started job
    pub fn add_lane(&mut self, id: JobId, name: &str) {
        let bar = self.multi.add(ProgressBar::new(LANE_TOTAL));
        bar.set_style(self.style.clone());
        bar.set_prefix(name.to_string());
        bar.set_message(Stage::VocalRemoval.label());
        bar.set_position(0);
        self.lanes.insert(
            id,
            Lane {
                bar,
                counter: LaneCounter::new(LANE_TOTAL),
            },
        );
    }

    /// Apply a job event to its lane; events for unknown lanes are ignored
    pub fn apply(&mut self, id: JobId, event: JobEvent) {
        let Some(lane) = self.lanes.get_mut(&id) else {
            debug!("Progress event for finished job {}: {:?}", id, event);
            return;
        };
        match event {
            JobEvent::StageStarted(stage) => lane.bar.set_message(stage.label()),
            JobEvent::Progress(progress) => {
                let position = lane.counter.apply(progress);
                lane.bar.set_position(position);
            }
        }
    }

    /// Drive a lane to its total and remove it from the display
    pub fn finish_lane(&mut self, id: JobId) {
        if let Some(mut lane) = self.lanes.remove(&id) {
            lane.bar.set_position(lane.counter.complete());
            lane.bar.finish_and_clear();
            self.multi.remove(&lane.bar);
        }
    }

    /// Current position of a lane
    pub fn position(&self, id: JobId) -> Option<u64> {
        self.lanes.get(&id).map(|lane| lane.counter.position())
    }

    /// Current status label of a lane
    pub fn status(&self, id: JobId) -> Option<String> {
        self.lanes.get(&id).map(|lane| lane.bar.message())
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Writer for log output that hides the lanes while a line is written
    pub fn log_writer(&self) -> BoardLogWriter {
        BoardLogWriter {
            multi: self.multi.clone(),
        }
    }

    /// Finish every remaining lane and clear the display
    pub fn stop(&mut self) {
        let ids: Vec<JobId> = self.lanes.keys().copied().collect();
        for id in ids {
            self.finish_lane(id);
        }
        if let Err(e) = self.multi.clear() {
            debug!("Failed to clear progress display: {}", e);
        }
    }
}

/// Stderr writer that suspends the board around every write
///
/// The fmt layer emits each event with a single write, so a log line never
/// interleaves with a lane redraw.
#[derive(Clone)]
pub struct BoardLogWriter {
    multi: MultiProgress,
}

impl io::Write for BoardLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.multi.suspend(|| io::stderr().write_all(buf))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

impl<'a> MakeWriter<'a> for BoardLogWriter {
    type Writer = BoardLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl Default for ProgressBoard {
    fn default() -> Self {
        Self::new()
    }
}
