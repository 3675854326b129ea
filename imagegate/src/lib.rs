//! # Imagegate
//!
//! Builds machine images for a set of target versions, checks each built
//! image structurally, boots it on a remote virtualization platform and
//! cleans up after itself.
//!
//! The crate is organised around four parts:
//!
//! - **Resource state reconciliation**: drive a remote disk into a state in
//!   which it can be deleted ([`reconcile`])
//! - **Boot verification**: poll a serial-console transcript for success or
//!   failure markers while a watcher tracks the instance state ([`boot`])
//! - **Structural validation**: inspect a raw disk image offline through a
//!   read-only loop device ([`validate`])
//! - **Orchestration**: run build, validate, remote test and cleanup per
//!   version with skip rules and a summary matrix ([`pipeline`])
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use imagegate::prelude::*;
//!
//! let config = PipelineConfig::load(Path::new("imagegate.json"))?;
//! config.validate()?;
//!
//! let platform: Arc<dyn Platform> = Arc::new(OxideCli::from_config(&config.platform));
//! let delegates = ImageDelegates::new(
//!     BuildTool::new(config.build.clone()),
//!     ImageValidator::new(config.validator.clone()),
//!     RemoteTester::new(platform, config.platform.clone(), config.boot.clone()),
//! );
//!
//! let summary = PipelineRunner::new(Arc::new(delegates), config.stages)
//!     .run(&config.work_items())
//!     .await;
//! println!("{}", summary.render_table());
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod boot;
pub mod build;
pub mod cancellation;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod platform;
pub mod process;
pub mod reconcile;
pub mod remote;
pub mod shrink;
pub mod validate;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::boot::{BootConfig, BootOutcome, BootReport, BootVerifier};
    pub use crate::build::{BuildConfig, BuildTool};
    pub use crate::cancellation::{CancellationToken, CleanupGuard, StructuredTaskGroup};
    pub use crate::config::PipelineConfig;
    pub use crate::core::{
        CheckRecord, CheckReport, Severity, StageKind, StageResult, StageStatus, WorkItem,
    };
    pub use crate::errors::{ImagegateError, Result};
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::observability::{init_logging, LogFormat};
    pub use crate::pipeline::{
        ImageDelegates, PipelineRunner, PipelineSummary, StageConfig, StageDelegates,
    };
    pub use crate::platform::{DiskState, InstanceState, OxideCli, Platform, PlatformConfig};
    pub use crate::reconcile::{make_deletable, reconcile_and_delete, ReconcileReport};
    pub use crate::remote::{CleanupReport, RemoteTester};
    pub use crate::validate::{ImageValidator, ValidatorConfig};
}
