//! Background liveness reaper.

use std::sync::Arc;

use log::debug;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::HubService;

/// Spawn the reaper task.
///
/// Runs one reconciliation pass per interval and reacts to route-invalidation
/// reports from the proxy in between. Shuts down when every invalidation
/// sender is dropped.
pub fn spawn_reaper(
    hub: Arc<HubService>,
    mut invalidations: mpsc::Receiver<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(hub.config().reaper_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    hub.reap().await;
                }
                message = invalidations.recv() => {
                    match message {
                        Some(prefix) => hub.handle_invalidation(&prefix).await,
                        None => {
                            debug!("invalidation channel closed, reaper exiting");
                            break;
                        }
                    }
                }
            }
        }
    })
}
