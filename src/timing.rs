//! Timer plumbing shared by the session, calibration, and analysis managers.
//!
//! Deferred work is never cancelled in place. Each manager keeps a
//! [`Generation`] counter next to its state; arming a timer captures the
//! current generation, and the callback compares it on entry. Any reset
//! (logout, extend, cancel, retry) bumps the counter, so a timer that fires
//! after the reset sees a stale generation and returns without touching state.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Monotonic token identifying the most recent timer arming.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Generation(u64);

impl Generation {
    /// Invalidate every previously armed timer and return the new token.
    pub fn bump(&mut self) -> Generation {
        self.0 = self.0.wrapping_add(1);
        *self
    }
}

/// Run `fut` once after `delay`.
pub fn spawn_after<F>(delay: Duration, fut: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        fut.await;
    })
}

/// Run `tick` every `period` until it returns `false`.
///
/// The first tick fires one full period after the call, not immediately.
pub fn spawn_every<F, Fut>(period: Duration, mut tick: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = bool> + Send,
{
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // interval's first tick completes immediately; consume it
        timer.tick().await;
        loop {
            timer.tick().await;
            if !tick().await {
                break;
            }
        }
    })
}
