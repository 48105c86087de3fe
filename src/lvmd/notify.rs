//! Capacity change notifier
//!
//! A single background task recomputes the per-class free-space snapshot
//! whenever a mutation triggers it, and on a slow periodic ticker. The
//! snapshot is published through a `tokio::sync::watch` channel: every
//! subscriber owns a one-slot mailbox that overwrites on push, so slow
//! consumers miss intermediate snapshots but always observe the latest.

use crate::domain::Lvm;
use crate::error::Result;
use crate::lvmd::capacity;
use crate::lvmd::device_class::DeviceClassRegistry;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Device class name → free bytes.
pub type CapacitySnapshot = BTreeMap<String, u64>;

/// Interval of the unconditional periodic refresh.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(600);

/// Handle used by mutating services to request a capacity re-publish.
#[derive(Clone)]
pub struct CapacityNotifier {
    trigger: mpsc::UnboundedSender<()>,
}

impl CapacityNotifier {
    /// Ask the notifier task to recompute and publish a snapshot. Returns
    /// immediately; publication is asynchronous.
    pub fn notify(&self) {
        let _ = self.trigger.send(());
    }
}

/// Compute the initial snapshot, then spawn the refresh task.
///
/// The task runs until `shutdown` flips to true (or its sender is dropped),
/// or until every [`CapacityNotifier`] clone is gone. On exit it drops the
/// publisher, which terminates every subscriber's watch stream.
pub async fn spawn(
    lvm: Arc<dyn Lvm>,
    classes: Arc<DeviceClassRegistry>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(CapacityNotifier, watch::Receiver<CapacitySnapshot>)> {
    let initial = compute_snapshot(lvm.as_ref(), &classes).await?;
    let (publish, subscribe) = watch::channel(initial);
    let (trigger, mut triggered) = mpsc::unbounded_channel::<()>();

    tokio::spawn(async move {
        let mut ticker =
            tokio::time::interval_at(Instant::now() + REFRESH_INTERVAL, REFRESH_INTERVAL);
        loop {
            tokio::select! {
                msg = triggered.recv() => {
                    if msg.is_none() {
                        break;
                    }
                }
                _ = ticker.tick() => {}
                // A closed shutdown channel counts as shutdown too.
                _ = shutdown.wait_for(|draining| *draining) => break,
            }
            match compute_snapshot(lvm.as_ref(), &classes).await {
                Ok(snapshot) => {
                    if publish.send(snapshot).is_err() {
                        break;
                    }
                }
                // Keep the previous snapshot; the ticker will try again.
                Err(e) => warn!(error = %e, "capacity snapshot refresh failed"),
            }
        }
        debug!("capacity notifier stopped");
    });

    Ok((CapacityNotifier { trigger }, subscribe))
}

async fn compute_snapshot(
    lvm: &dyn Lvm,
    classes: &DeviceClassRegistry,
) -> Result<CapacitySnapshot> {
    let mut snapshot = CapacitySnapshot::new();
    for dc in classes.list() {
        snapshot.insert(dc.name.clone(), capacity::free_bytes(lvm, dc).await?);
    }
    Ok(snapshot)
}
