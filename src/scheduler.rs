/// Status watcher
/// Re-evaluates the effective status at the top of every minute, shop time, and logs when it changes.
///
/// Nothing here feeds back into resolution; the watcher only observes.

use chrono::Timelike;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::model::ShopStatus;
use crate::server::ServerMetrics;
use crate::status::{Resolution, Rule, StatusResolver};
use crate::store::{ShopStore, StoreError};

/// Seconds into a minute during which an evaluation runs without waiting
pub const GRACE_SECONDS: u32 = 2;

/// Calculate wait time until the next evaluation from the current second of the minute.
/// Returns None if we should run immediately.
pub fn time_until_next_evaluation_at(second: u32) -> Option<Duration> {
    if second < GRACE_SECONDS {
        return None;
    }
    Some(Duration::from_secs(60u64.saturating_sub(second as u64)))
}

/// Format duration for logging
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;

    if hours > 0 {
        format!("{}h {}m", hours, mins)
    } else if mins > 0 {
        format!("{}m", mins)
    } else {
        format!("{}s", secs)
    }
}

/// A change in effective status between two evaluations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// None on the first evaluation after startup
    pub from: Option<ShopStatus>,
    pub to: ShopStatus,
    pub decided_by: Rule,
}

/// Remembers the last effective status so changes can be reported once
#[derive(Debug, Default)]
pub struct StatusWatcher {
    last: Option<ShopStatus>,
}

impl StatusWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<ShopStatus> {
        self.last
    }

    /// Record a resolution; returns the transition if the status differs from the previous one
    pub fn observe(&mut self, resolution: Resolution) -> Option<Transition> {
        if self.last == Some(resolution.status) {
            return None;
        }
        let transition = Transition {
            from: self.last,
            to: resolution.status,
            decided_by: resolution.decided_by,
        };
        self.last = Some(resolution.status);
        Some(transition)
    }
}

/// Evaluate once, update metrics, and log a transition if there was one
pub fn evaluate(
    store: &dyn ShopStore,
    resolver: &StatusResolver,
    metrics: &ServerMetrics,
    watcher: &mut StatusWatcher,
) -> Result<Resolution, StoreError> {
    let config = store.read()?;
    let resolution = resolver.resolve(&config);
    metrics.record_status(resolution.status);

    match watcher.observe(resolution) {
        Some(Transition { from: None, to, decided_by }) => {
            info!("Shop is {} (decided by {:?})", to, decided_by);
        }
        Some(Transition { from: Some(from), to, decided_by }) => {
            info!("Shop status changed: {} -> {} (decided by {:?})", from, to, decided_by);
        }
        None => debug!("Shop still {}", resolution.status),
    }
    Ok(resolution)
}

/// Run the watcher loop until cancelled
pub async fn run_status_watcher(
    store: Arc<dyn ShopStore>,
    resolver: StatusResolver,
    metrics: Arc<ServerMetrics>,
    cancel_token: CancellationToken,
) {
    info!("Status watcher started (every minute, Asia/Kolkata)");
    let mut watcher = StatusWatcher::new();

    loop {
        if let Err(e) = evaluate(store.as_ref(), &resolver, &metrics, &mut watcher) {
            warn!("Status evaluation failed: {}", e);
        }

        let second = resolver.window().now_in_zone().second();
        // Always wait at least until the next minute after an evaluation
        let wait = time_until_next_evaluation_at(second).unwrap_or(Duration::from_secs(60));
        debug!("Next evaluation in {}", format_duration(wait));

        tokio::select! {
            _ = sleep(wait) => {}
            _ = cancel_token.cancelled() => {
                info!("Status watcher stopped");
                break;
            }
        }
    }
}



/// Kani formal verification proofs
#[cfg(kani)]
mod kani_proofs {
    use super::*;

    #[kani::proof]
    fn wait_bounded() {
        let second: u32 = kani::any();
        kani::assume(second < 60);

        if let Some(duration) = time_until_next_evaluation_at(second) {
            kani::assert(duration.as_secs() <= 60, "wait must not exceed a minute");
        }
    }
}
