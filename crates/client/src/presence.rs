//! Participant count and session countdown.
//!
//! The tracker holds the latest server-reported [`Presence`] and, while the
//! remaining time is positive, a one-second interval that lowers it locally.
//! Waiting ([`PresenceTracker::tick`]) and applying ([`PresenceTracker::apply_tick`])
//! are separate so the owner can discard a tick that raced with a reset.

use std::time::Duration;

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use overlay_chat_protocol::Presence;

const TICK: Duration = Duration::from_secs(1);
const TICK_MS: u64 = 1_000;

#[derive(Debug, Default)]
pub struct PresenceTracker {
    current: Presence,
    countdown: Option<Interval>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Presence {
        self.current
    }

    pub fn is_counting_down(&self) -> bool {
        self.countdown.is_some()
    }

    /// Replace the presence with a server report. Any running countdown is
    /// dropped and, if time remains, a fresh one starts a full second from now.
    pub fn apply_update(&mut self, presence: Presence) {
        self.current = presence;
        self.countdown = (presence.remaining_ms > 0).then(|| {
            let mut interval = interval_at(Instant::now() + TICK, TICK);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
    }

    /// Wait for the next countdown tick; never resolves while no countdown runs.
    pub async fn tick(&mut self) {
        match self.countdown.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending().await,
        }
    }

    /// Lower the remaining time by one second. Returns the new presence, or
    /// `None` when no countdown was running.
    pub fn apply_tick(&mut self) -> Option<Presence> {
        self.countdown.as_ref()?;
        self.current.remaining_ms = self.current.remaining_ms.saturating_sub(TICK_MS);
        if self.current.remaining_ms == 0 {
            self.countdown = None;
        }
        Some(self.current)
    }

    /// Stop counting down, keeping the last known values.
    pub fn stop(&mut self) {
        self.countdown = None;
    }

    /// Stop counting down and forget everything.
    pub fn reset(&mut self) {
        self.current = Presence::default();
        self.countdown = None;
    }
}
