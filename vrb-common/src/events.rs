//! Progress event types
//!
//! A pipeline job reports two kinds of progress: an absolute percentage while
//! the separation model runs, and discrete ticks while the converter runs.
//! They are kept as separate variants so the display never has to guess what
//! a bare number means.

use serde::{Deserialize, Serialize};

/// Pipeline stage of a single job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    /// Separation model splits the input into instrumental and vocal stems
    VocalRemoval,
    /// Converter encodes the instrumental stem and tags are rewritten
    Conversion,
}

impl Stage {
    /// Status label shown next to a progress lane
    pub fn label(&self) -> &'static str {
        match self {
            Stage::VocalRemoval => "Removing Vox",
            Stage::Conversion => "Converting",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Progress signal emitted by a running stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressEvent {
    /// Set progress to an absolute percentage in `0..=100`
    Absolute(u8),
    /// Advance progress by one unit
    Increment,
}

/// Event sent from a job to whoever renders its progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobEvent {
    /// The job entered a new stage
    StageStarted(Stage),
    /// Progress inside the current stage
    Progress(ProgressEvent),
}

impl From<ProgressEvent> for JobEvent {
    fn from(event: ProgressEvent) -> Self {
        JobEvent::Progress(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_labels() {
        assert_eq!(Stage::VocalRemoval.label(), "Removing Vox");
        assert_eq!(Stage::Conversion.to_string(), "Converting");
    }

    #[test]
    fn test_progress_converts_into_job_event() {
        let event: JobEvent = ProgressEvent::Absolute(42).into();
        assert_eq!(event, JobEvent::Progress(ProgressEvent::Absolute(42)));
    }
}
