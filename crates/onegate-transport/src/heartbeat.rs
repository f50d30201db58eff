//! Periodic heartbeat timer.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::trace;

use crate::generation::Generation;

/// Runs `beat` every `period` until `generation` advances.
///
/// The first beat fires one period after the call. The loop captures the
/// generation current at spawn time and exits at the first tick that finds
/// it stale.
pub fn spawn_heartbeat<F, Fut>(period: Duration, generation: Generation, mut beat: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let stamp = generation.current();
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if !generation.is_current(stamp) {
                trace!("Heartbeat timer outlived its generation");
                return;
            }
            beat().await;
        }
    })
}
