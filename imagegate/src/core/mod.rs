//! Core domain model types for imagegate.
//!
//! This module contains the fundamental types used throughout the crate:
//! - Work items
//! - Stage kind, stage status and check severity enums
//! - Per-stage results
//! - Check records and the report that accumulates them

mod check;
mod item;
mod result;
mod status;

pub use check::{CheckCounts, CheckRecord, CheckReport};
pub use item::WorkItem;
pub use result::StageResult;
pub use status::{Severity, StageKind, StageStatus};
