//! Wall-clock sources and the logical timestamp clock.

use crate::error::{CoreError, CoreResult};
use crate::types::Timestamp;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// A source of wall-clock seconds.
pub trait WallClock: Send + Sync {
    /// Returns the current time in whole seconds since the Unix epoch,
    /// or `None` if the source cannot produce one.
    fn now_secs(&self) -> Option<u32>;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemWallClock;

impl WallClock for SystemWallClock {
    fn now_secs(&self) -> Option<u32> {
        let secs = SystemTime::now().duration_since(UNIX_EPOCH).ok()?.as_secs();
        u32::try_from(secs).ok()
    }
}

/// A manually driven clock for tests and tools.
///
/// Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualWallClock {
    current: Arc<Mutex<Option<u32>>>,
}

impl ManualWallClock {
    /// Creates a clock reading `secs`.
    #[must_use]
    pub fn new(secs: u32) -> Self {
        Self {
            current: Arc::new(Mutex::new(Some(secs))),
        }
    }

    /// Sets the current time. Going backwards is allowed; the logical clock
    /// ignores it.
    pub fn set(&self, secs: u32) {
        *self.current.lock() = Some(secs);
    }

    /// Advances the clock by `secs`.
    pub fn advance(&self, secs: u32) {
        let mut current = self.current.lock();
        *current = current.map(|now| now.saturating_add(secs));
    }

    /// Makes the clock unavailable.
    pub fn fail(&self) {
        *self.current.lock() = None;
    }
}

impl WallClock for ManualWallClock {
    fn now_secs(&self) -> Option<u32> {
        *self.current.lock()
    }
}

/// The logical clock that issues log timestamps.
///
/// Not synchronized on its own; it lives inside the context's slot state
/// and is only touched under that lock.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct LogicalClock {
    last: Timestamp,
}

impl LogicalClock {
    pub(crate) fn starting_after(last: Timestamp) -> Self {
        Self { last }
    }

    pub(crate) fn last(&self) -> Timestamp {
        self.last
    }

    /// Moves the clock forward to `ts`. Earlier values are ignored.
    pub(crate) fn advance_to(&mut self, ts: Timestamp) -> bool {
        if ts > self.last {
            self.last = ts;
            true
        } else {
            false
        }
    }

    /// Reserves `count` consecutive ticks and returns the first.
    ///
    /// All reserved ticks share the returned timestamp's seconds value and
    /// have consecutive increments.
    pub(crate) fn reserve(&mut self, wall: &dyn WallClock, count: u32) -> CoreResult<Timestamp> {
        debug_assert!(count > 0);
        let now = wall
            .now_secs()
            .ok_or_else(|| CoreError::allocation("wall clock unavailable"))?;

        let mut first = if now > self.last.secs() {
            Timestamp::new(now, 1)
        } else {
            match self.last.inc().checked_add(1) {
                Some(inc) => Timestamp::new(self.last.secs(), inc),
                None => Timestamp::new(self.next_secs()?, 1),
            }
        };
        if first.inc().checked_add(count - 1).is_none() {
            first = Timestamp::new(first.secs().max(self.next_secs()?), 1);
        }

        self.last = Timestamp::new(first.secs(), first.inc() + (count - 1));
        Ok(first)
    }

    fn next_secs(&self) -> CoreResult<u32> {
        self.last
            .secs()
            .checked_add(1)
            .ok_or_else(|| CoreError::allocation("timestamp space exhausted"))
    }
}
