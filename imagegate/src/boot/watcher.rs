//! Background lifecycle-state watcher.
//!
//! Advisory only: it reports state transitions to the operator and publishes
//! the last state it saw, but the primary polling loop never consults it to
//! decide the outcome.

use crate::cancellation::CancellationToken;
use crate::platform::{InstanceState, Platform};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Polls `instance` until it reaches a watch-ending state, `rounds` run out,
/// or `token` is cancelled.
pub(crate) async fn watch_instance_state(
    platform: Arc<dyn Platform>,
    instance: String,
    rounds: u32,
    interval: Duration,
    last_seen: watch::Sender<Option<InstanceState>>,
    token: Arc<CancellationToken>,
) -> Result<(), String> {
    let mut previous: Option<InstanceState> = None;

    for round in 1..=rounds {
        if token.is_cancelled() {
            break;
        }

        let queried = tokio::select! {
            () = token.cancelled() => break,
            queried = platform.instance_state(&instance) => queried,
        };
        match queried {
            Ok(state) => {
                if previous.as_ref() != Some(&state) {
                    match &previous {
                        Some(prev) => info!(instance = %instance, from = %prev, to = %state, "Instance state changed"),
                        None => info!(instance = %instance, state = %state, "Instance state"),
                    }
                    last_seen.send_replace(Some(state.clone()));
                }
                let done = state.ends_watch();
                previous = Some(state);
                if done {
                    debug!(instance = %instance, round, "State watcher finished");
                    break;
                }
            }
            Err(e) => debug!(instance = %instance, round, "State query failed: {}", e),
        }

        if round < rounds {
            tokio::select! {
                () = token.cancelled() => break,
                () = tokio::time::sleep(interval) => {}
            }
        }
    }

    Ok(())
}
