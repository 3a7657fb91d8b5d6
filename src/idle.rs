//! Link activity tracking and the idle-ping scheduler.
//!
//! Payment hosts drop connections that go quiet, so the client tracks the
//! time of the last wire activity in either direction and fires the
//! caller's ping handler once the link has been idle past the configured
//! threshold. The scheduler owns no message format; the handler is
//! expected to issue its own network-management message through
//! [`Client::send`], which in turn refreshes the activity clock.
//!
//! [`Client::send`]: crate::Client::send

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Timestamp of the most recent wire activity.
///
/// Touched after every successful outbound enqueue and every decoded
/// inbound message.
#[derive(Debug)]
pub(crate) struct ActivityTracker {
    last: Mutex<Instant>,
}

impl ActivityTracker {
    pub(crate) fn new() -> Self {
        Self {
            last: Mutex::new(Instant::now()),
        }
    }

    /// Record activity now.
    pub(crate) fn touch(&self) {
        *self.last.lock() = Instant::now();
    }

    /// How long the link has been idle.
    pub(crate) fn idle_for(&self) -> Duration {
        self.last.lock().elapsed()
    }
}

/// Ticks every `idle_time` and calls `fire` whenever the link has been
/// idle for at least that long. Exits on shutdown.
///
/// `fire` is responsible for the no-overlap rule: it is called on the
/// scheduler task and must return immediately, spawning the actual ping
/// (or skipping the tick when one is still running).
pub(crate) async fn idle_loop<F>(
    activity: std::sync::Arc<ActivityTracker>,
    idle_time: Duration,
    shutdown: CancellationToken,
    mut fire: F,
) where
    F: FnMut(),
{
    let mut ticker = tokio::time::interval(idle_time);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {
                if activity.idle_for() >= idle_time {
                    fire();
                }
            }
        }
    }
}
