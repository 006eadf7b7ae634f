//! vrb-batch library interface
//!
//! Exposes the pipeline pieces for the binary and for integration testing.

pub mod progress;
pub mod services;
pub mod workflow;

pub use progress::ProgressBoard;
pub use services::{InputResolver, JobDescriptor, ResolverSettings};
pub use workflow::{JobExecutor, PipelineExecutor, ProgressHandle, RunSummary, Scheduler};
