//! Structured cancellation and cleanup utilities.
//!
//! This module provides:
//! - CancellationToken for cooperative cancellation
//! - CleanupRegistry and CleanupGuard for LIFO cleanup on every exit path
//! - StructuredTaskGroup for auxiliary tasks that must not outlive their caller

mod cleanup;
mod task_group;
mod token;

pub use cleanup::{CleanupGuard, CleanupRegistry};
pub use task_group::StructuredTaskGroup;
pub use token::CancellationToken;
