//! Services used by pipeline jobs

pub mod input_resolver;
pub mod process_runner;
pub mod tag_io;

pub use input_resolver::{InputResolver, JobDescriptor, ResolverSettings};
pub use process_runner::{ExitState, OutputLine, ProcessOutcome, ProcessRunner, RunOptions};
pub use tag_io::{Id3TagWriter, LoftyTagReader, TagReader, TagWriter, TrackTags};
