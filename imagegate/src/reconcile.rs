//! Drives a disk out of its import states so it can be deleted.
//!
//! A disk created by a bulk import moves through
//! `importing_from_bulk_writes -> import_ready -> detached`, and only the
//! last state is deletable. The reconciler issues the minimum transitions
//! (stop, then finalize without a snapshot) and never retries: a failed
//! transition becomes a warning and the delete is attempted anyway, since
//! the delete call is what decides whether the disk is gone.

use crate::platform::{DiskState, Platform};
use serde::Serialize;
use tracing::{info, warn};

/// Outcome of reconciling one disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// The disk that was reconciled.
    pub disk: String,
    /// The state read before any transition, if the read succeeded.
    pub initial_state: Option<DiskState>,
    /// The locally tracked state after the transitions.
    pub final_state: Option<DiskState>,
    /// Non-fatal problems met along the way.
    pub warnings: Vec<String>,
    /// Whether the disk was deleted (only set by [`reconcile_and_delete`]).
    pub deleted: bool,
}

impl ReconcileReport {
    fn new(disk: &str) -> Self {
        Self {
            disk: disk.to_string(),
            initial_state: None,
            final_state: None,
            warnings: Vec::new(),
            deleted: false,
        }
    }

    fn warn(&mut self, message: String) {
        warn!(disk = %self.disk, "{}", message);
        self.warnings.push(message);
    }

    /// True when nothing went wrong.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Moves `disk` through the transitions required to make it deletable.
///
/// A failed state read means "no transition needed". The local state is
/// advanced optimistically after a successful stop, without re-reading it.
pub async fn make_deletable(platform: &dyn Platform, disk: &str) -> ReconcileReport {
    let mut report = ReconcileReport::new(disk);

    let mut state = match platform.disk_state(disk).await {
        Ok(state) => {
            info!(disk, state = %state, "Read disk state");
            report.initial_state = Some(state.clone());
            state
        }
        Err(e) => {
            report.warn(format!("could not read state of disk {disk}, deleting directly: {e}"));
            return report;
        }
    };

    if state == DiskState::ImportingFromBulkWrites {
        match platform.stop_disk_import(disk).await {
            Ok(()) => {
                info!(disk, "Stopped bulk import");
                state = DiskState::ImportReady;
            }
            Err(e) => report.warn(format!("failed to stop bulk import on disk {disk}: {e}")),
        }
    }

    if state == DiskState::ImportReady {
        match platform.finalize_disk_import(disk).await {
            Ok(()) => {
                info!(disk, "Finalized import");
                state = DiskState::Detached;
            }
            Err(e) => report.warn(format!("failed to finalize import on disk {disk}: {e}")),
        }
    }

    report.final_state = Some(state);
    report
}

/// Runs [`make_deletable`] and then deletes the disk.
pub async fn reconcile_and_delete(platform: &dyn Platform, disk: &str) -> ReconcileReport {
    let mut report = make_deletable(platform, disk).await;
    match platform.delete_disk(disk).await {
        Ok(()) => {
            info!(disk, "Deleted disk");
            report.deleted = true;
        }
        Err(e) => report.warn(format!("failed to delete disk {disk}: {e}")),
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ImagegateError;
    use crate::platform::MockPlatform;
    use mockall::Sequence;

    fn with_state(mock: &mut MockPlatform, state: DiskState) {
        mock.expect_disk_state()
            .withf(|disk: &str| disk == "d1")
            .times(1)
            .returning(move |_| Ok(state.clone()));
    }

    #[tokio::test]
    async fn test_import_ready_finalizes_once_without_stop() {
        let mut mock = MockPlatform::new();
        with_state(&mut mock, DiskState::ImportReady);
        mock.expect_stop_disk_import().times(0);
        mock.expect_finalize_disk_import()
            .times(1)
            .returning(|_| Ok(()));

        let report = make_deletable(&mock, "d1").await;

        assert!(report.is_clean());
        assert_eq!(report.initial_state, Some(DiskState::ImportReady));
        assert_eq!(report.final_state, Some(DiskState::Detached));
    }

    #[tokio::test]
    async fn test_importing_stops_then_finalizes() {
        let mut mock = MockPlatform::new();
        let mut seq = Sequence::new();
        with_state(&mut mock, DiskState::ImportingFromBulkWrites);
        mock.expect_stop_disk_import()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        mock.expect_finalize_disk_import()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let report = make_deletable(&mock, "d1").await;

        assert!(report.is_clean());
        assert_eq!(report.final_state, Some(DiskState::Detached));
    }

    #[tokio::test]
    async fn test_detached_and_unknown_need_no_transition() {
        for state in [DiskState::Detached, DiskState::Unknown("faulted".to_string())] {
            let mut mock = MockPlatform::new();
            with_state(&mut mock, state.clone());
            mock.expect_stop_disk_import().times(0);
            mock.expect_finalize_disk_import().times(0);

            let report = make_deletable(&mock, "d1").await;
            assert!(report.is_clean());
            assert_eq!(report.final_state, Some(state));
        }
    }

    #[tokio::test]
    async fn test_unreadable_state_goes_straight_to_delete() {
        let mut mock = MockPlatform::new();
        mock.expect_disk_state()
            .returning(|_| Err(ImagegateError::platform("disk not found")));
        mock.expect_stop_disk_import().times(0);
        mock.expect_finalize_disk_import().times(0);
        mock.expect_delete_disk().times(1).returning(|_| Ok(()));

        let report = reconcile_and_delete(&mock, "d1").await;

        assert!(report.deleted);
        assert!(report.initial_state.is_none());
        assert_eq!(report.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_stop_skips_finalize_but_still_deletes() {
        let mut mock = MockPlatform::new();
        with_state(&mut mock, DiskState::ImportingFromBulkWrites);
        mock.expect_stop_disk_import()
            .times(1)
            .returning(|_| Err(ImagegateError::platform("conflict")));
        mock.expect_finalize_disk_import().times(0);
        mock.expect_delete_disk().times(1).returning(|_| Ok(()));

        let report = reconcile_and_delete(&mock, "d1").await;

        assert!(report.deleted);
        assert_eq!(report.final_state, Some(DiskState::ImportingFromBulkWrites));
        assert_eq!(report.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_finalize_is_a_warning() {
        let mut mock = MockPlatform::new();
        with_state(&mut mock, DiskState::ImportReady);
        mock.expect_finalize_disk_import()
            .returning(|_| Err(ImagegateError::platform("busy")));
        mock.expect_delete_disk()
            .returning(|_| Err(ImagegateError::platform("disk is not detached")));

        let report = reconcile_and_delete(&mock, "d1").await;

        assert!(!report.deleted);
        assert_eq!(report.warnings.len(), 2);
        assert!(report.warnings[1].contains("failed to delete"));
    }
}
