// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Time sources used by the core.
//!
//! The scheduler runs on a monotonic clock; notification bookkeeping
//! (`last_confirmable`, value timestamps) uses a realtime clock that is only
//! ever compared against itself and therefore does not need to be
//! synchronized. Both are reachable through the [`Clock`] trait so tests can
//! substitute a manually advanced clock.

use std::{
    cell::RefCell,
    rc::Rc,
    time::{Duration, Instant},
};

use chrono::{DateTime, TimeZone, Utc};

/// Point on the monotonic timeline, measured from an arbitrary epoch fixed
/// at clock creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Timestamp(Duration);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(Duration::ZERO);

    pub fn from_duration(d: Duration) -> Self {
        Timestamp(d)
    }

    pub fn checked_add(self, d: Duration) -> Option<Timestamp> {
        self.0.checked_add(d).map(Timestamp)
    }

    pub fn saturating_add(self, d: Duration) -> Timestamp {
        Timestamp(self.0.saturating_add(d))
    }

    /// `self - other`, clamped at zero.
    pub fn saturating_since(self, other: Timestamp) -> Duration {
        self.0.saturating_sub(other.0)
    }
}

pub type RealTimestamp = DateTime<Utc>;

/// Realtime difference `a - b` clamped at zero, as a `std` duration.
pub fn real_since(a: RealTimestamp, b: RealTimestamp) -> Duration {
    (a - b).to_std().unwrap_or(Duration::ZERO)
}

pub trait Clock {
    fn now(&self) -> Timestamp;
    fn real_now(&self) -> RealTimestamp;
}

/// Production clock: `std::time::Instant` for the monotonic part,
/// `chrono::Utc` for the realtime part.
#[derive(Debug)]
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.epoch.elapsed())
    }

    fn real_now(&self) -> RealTimestamp {
        Utc::now()
    }
}

#[derive(Debug)]
struct ManualState {
    monotonic: Duration,
    real_epoch_s: i64,
    real_offset: Duration,
}

/// Manually advanced clock for tests and simulations. Clones share state,
/// so a test can keep one handle while the client owns another.
#[derive(Debug, Clone)]
pub struct ManualClock {
    state: Rc<RefCell<ManualState>>,
}

impl ManualClock {
    /// Creates a clock whose realtime part starts at `real_epoch_s` seconds
    /// past the Unix epoch and whose monotonic part starts at zero.
    pub fn starting_at(real_epoch_s: i64) -> Self {
        ManualClock {
            state: Rc::new(RefCell::new(ManualState {
                monotonic: Duration::ZERO,
                real_epoch_s,
                real_offset: Duration::ZERO,
            })),
        }
    }

    /// Advances both timelines by `d`.
    pub fn advance(&self, d: Duration) {
        let mut st = self.state.borrow_mut();
        st.monotonic += d;
        st.real_offset += d;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.state.borrow().monotonic)
    }

    fn real_now(&self) -> RealTimestamp {
        let st = self.state.borrow();
        let base = Utc
            .timestamp_opt(st.real_epoch_s, 0)
            .single()
            .unwrap_or_else(Utc::now);
        base + chrono::Duration::from_std(st.real_offset)
            .unwrap_or_else(|_| chrono::Duration::zero())
    }
}
