//! Backoff schedule for transient storage failures.
//!
//! Transient errors (5xx responses, throttling, connection resets) are
//! retried with exponential backoff until a total delay budget of about
//! one minute is spent; permanent errors are surfaced immediately.
//! Callers drive the schedule themselves so the retried operation can
//! borrow freely across attempts:
//!
//! ```rust
//! use wfm_core::retry::Backoff;
//!
//! let mut backoff = Backoff::new();
//! while let Some(delay) = backoff.next_delay() {
//!     // sleep(delay), then retry the operation
//!     # let _ = delay;
//!     # break;
//! }
//! ```

use std::time::Duration;

const INITIAL_DELAY: Duration = Duration::from_secs(1);
const MAX_DELAY: Duration = Duration::from_secs(16);
const TOTAL_BUDGET: Duration = Duration::from_secs(60);

/// An exponential backoff schedule with a total delay budget.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    next: Duration,
    spent: Duration,
}

impl Backoff {
    /// Creates the standard storage-retry schedule: 1s, 2s, 4s, 8s, 16s,
    /// 16s, ... until roughly 60 seconds of delay have been spent.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: INITIAL_DELAY,
            spent: Duration::ZERO,
        }
    }

    /// Returns the delay to sleep before the next attempt, or `None`
    /// once the budget is exhausted and the caller should give up.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.spent + self.next > TOTAL_BUDGET {
            return None;
        }
        let delay = self.next;
        self.spent += delay;
        self.next = (self.next * 2).min(MAX_DELAY);
        Some(delay)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}
