//! Background expiry of loop-guard and cooldown entries.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use crate::relay::engine::RelayEngine;

/// Periodic sweep task. Dropping the handle stops the task.
pub struct Sweeper {
    cancel: Arc<Notify>,
}

impl Sweeper {
    /// Sweep `engine` every `period`, independent of message handling.
    pub fn start(engine: Arc<RelayEngine>, period: Duration) -> Self {
        let cancel = Arc::new(Notify::new());
        let cancel_clone = cancel.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;

                    _ = cancel_clone.notified() => break,
                    _ = interval.tick() => {
                        let now = Instant::now();
                        let guard = engine.guard().sweep(now);
                        let cooldowns = engine.limiter().sweep(now);
                        let (seen, sent) = engine.guard().sizes();
                        debug!(
                            swept_seen = guard.seen,
                            swept_sent = guard.sent,
                            swept_cooldowns = cooldowns,
                            seen,
                            sent,
                            cooldowns_tracked = engine.limiter().tracked(),
                            "🧹 Sweep"
                        );
                    }
                }
            }
        });

        Self { cancel }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.cancel.notify_one();
    }
}
