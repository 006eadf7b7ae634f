//! # VRB Common Library
//!
//! Shared code for the vocal remover batch tools including:
//! - Error types
//! - Configuration loading and resolution
//! - Progress event types exchanged between pipeline jobs and the display

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
pub use events::{JobEvent, ProgressEvent, Stage};
