//! Pipeline orchestration.
//!
//! This module provides:
//! - The stage delegates seam and its production implementation
//! - The runner that applies the stage skip rules per item
//! - The summary matrix and its rendering

mod delegates;
mod integration_tests;
mod runner;
mod summary;

pub use delegates::{ImageDelegates, StageDelegates};
pub use runner::{PipelineRunner, StageConfig};
pub use summary::{ItemReport, PipelineSummary};
