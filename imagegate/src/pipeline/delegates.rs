//! The collaborators each pipeline stage hands its work to.

use crate::build::BuildTool;
use crate::core::{CheckReport, WorkItem};
use crate::errors::Result;
use crate::remote::RemoteTester;
use crate::validate::ImageValidator;
use async_trait::async_trait;

/// Work performed by the four stages for one item.
///
/// Exit codes follow the process convention: 0 is success.
#[async_trait]
pub trait StageDelegates: Send + Sync {
    /// Builds the item's image.
    async fn build(&self, item: &WorkItem) -> Result<i32>;

    /// Validates the item's image.
    async fn validate(&self, item: &WorkItem) -> Result<CheckReport>;

    /// Boot-tests the item's image on the remote platform.
    async fn remote_test(&self, item: &WorkItem) -> Result<i32>;

    /// Removes the item's remote resources, returning warnings.
    async fn cleanup(&self, item: &WorkItem) -> Vec<String>;
}

/// Delegates backed by the real build tool, validator and platform.
pub struct ImageDelegates {
    builder: BuildTool,
    validator: ImageValidator,
    tester: RemoteTester,
}

impl ImageDelegates {
    /// Wires the three collaborators together.
    pub fn new(builder: BuildTool, validator: ImageValidator, tester: RemoteTester) -> Self {
        Self {
            builder,
            validator,
            tester,
        }
    }
}

#[async_trait]
impl StageDelegates for ImageDelegates {
    async fn build(&self, item: &WorkItem) -> Result<i32> {
        self.builder.build(item).await
    }

    async fn validate(&self, item: &WorkItem) -> Result<CheckReport> {
        self.validator.validate(&item.output).await
    }

    async fn remote_test(&self, item: &WorkItem) -> Result<i32> {
        self.tester.test(item).await
    }

    async fn cleanup(&self, item: &WorkItem) -> Vec<String> {
        self.tester.cleanup(item).await.warnings
    }
}
