//! Liveness beacons to the group coordinator
//!
//! The coordinator evicts members that stay silent for longer than the
//! session timeout. [`Heartbeat`] spaces beacons at a configured interval
//! strictly smaller than that budget; the consume loop calls
//! [`send_if_necessary`](Heartbeat::send_if_necessary) before every fetch
//! and after every user callback, so slow handlers cannot starve the
//! cadence.

use crate::error::Result;
use crate::group::Group;
use std::time::{Duration, Instant};
use tracing::trace;

/// Schedules liveness beacons for one group member.
#[derive(Debug)]
pub struct Heartbeat {
    interval: Duration,
    last_beacon: Option<Instant>,
}

impl Heartbeat {
    /// Create a scheduler sending at most one beacon per `interval`.
    pub fn new(interval: Duration) -> Self {
        Self { interval, last_beacon: None }
    }

    /// Send a beacon if the interval has elapsed since the last successful
    /// one. Cheap and idempotent; a no-op while the group reports no
    /// membership.
    ///
    /// # Errors
    /// Propagates [`Error::Heartbeat`](crate::Error::Heartbeat) from the
    /// group. The beacon timestamp is only advanced on success, so a failed
    /// beacon is retried at the next call.
    pub fn send_if_necessary<G: Group + ?Sized>(&mut self, group: &mut G) -> Result<()> {
        if !group.is_member() {
            return Ok(());
        }
        if let Some(last) = self.last_beacon {
            if last.elapsed() < self.interval {
                return Ok(());
            }
        }
        group.heartbeat()?;
        trace!("heartbeat sent");
        self.last_beacon = Some(Instant::now());
        Ok(())
    }

    /// Forget the last beacon so the next check sends immediately.
    ///
    /// Called after a rejoin: the join exchange itself proved liveness, but
    /// the new session deserves a prompt first beacon.
    pub fn reset(&mut self) {
        self.last_beacon = None;
    }
}
