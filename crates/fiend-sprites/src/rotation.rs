//! Periodic random image changes.

use std::{sync::Arc, time::Duration};

use fiend_core::TargetController;
use tokio::{
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

/// Spawn a task that calls `load_random` every `interval` until `cancel` fires.
///
/// The first change happens one full interval after spawning. Failures are
/// logged and the loop keeps going.
pub fn spawn_rotation(
    controller: Arc<dyn TargetController>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_secs = interval.as_secs(), "Image rotation started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = controller.load_random().await {
                        tracing::warn!("Rotation failed to load random images: {e}");
                    }
                }
            }
        }

        tracing::debug!("Image rotation stopped");
    })
}
