//! Rate budget tracking
//!
//! The API reports how many calls remain in the current window and when the
//! window resets. That report is advisory: the tracker only ever reflects the
//! latest response, and when nothing usable has been observed it lets calls
//! through, since the next response corrects it.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Latest budget report from the API
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BudgetSnapshot {
    /// Calls remaining in the current window, if known
    pub remaining: Option<u32>,

    /// When the window resets, if known
    pub resets_at: Option<DateTime<Utc>>,
}

/// Answer to "may a call be issued now?"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permit {
    Proceed,
    /// Budget exhausted; retry after this long
    Wait(Duration),
}

/// Shared, cloneable handle to the rate budget
///
/// All workers hold clones of the same handle. Updates are serialized by the
/// inner mutex; the lock is never held across an await.
#[derive(Debug, Clone)]
pub struct RateBudget {
    inner: Arc<Mutex<BudgetSnapshot>>,
    reserve: u32,
}

impl RateBudget {
    /// Creates a tracker that knows nothing yet
    ///
    /// # Arguments
    ///
    /// * `reserve` - Calls to leave untouched; waiting starts once remaining drops to this
    pub fn new(reserve: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BudgetSnapshot::default())),
            reserve,
        }
    }

    /// Creates a tracker seeded with a snapshot
    pub fn with_snapshot(snapshot: BudgetSnapshot, reserve: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(snapshot)),
            reserve,
        }
    }

    /// Records the latest budget report
    ///
    /// Fields that are `None` leave the previously known value in place, so a
    /// response carrying only headers does not erase the body's reset time.
    pub fn observe(&self, remaining: Option<u32>, resets_at: Option<DateTime<Utc>>) {
        let mut state = self.lock();
        if remaining.is_some() {
            state.remaining = remaining;
        }
        if resets_at.is_some() {
            state.resets_at = resets_at;
        }
        tracing::trace!(
            "Rate budget observed: remaining={:?}, resets_at={:?}",
            state.remaining,
            state.resets_at
        );
    }

    /// Forces a wait until `resets_at` (server said we are throttled)
    pub fn exhaust(&self, resets_at: Option<DateTime<Utc>>) {
        let mut state = self.lock();
        state.remaining = Some(0);
        if resets_at.is_some() {
            state.resets_at = resets_at;
        }
    }

    /// Optimistically spends one call before it is issued
    pub fn consume(&self) {
        let mut state = self.lock();
        if let Some(remaining) = state.remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
        }
    }

    /// Checks whether at least one call may be issued at `now`
    pub fn may_proceed(&self, now: DateTime<Utc>) -> Permit {
        let state = *self.lock();

        let remaining = match state.remaining {
            Some(remaining) => remaining,
            None => return Permit::Proceed,
        };

        if remaining > self.reserve {
            return Permit::Proceed;
        }

        match state.resets_at {
            Some(resets_at) if resets_at > now => {
                Permit::Wait((resets_at - now).to_std().unwrap_or(Duration::ZERO))
            }
            // Reset time passed (or unknown): the window has rolled over
            _ => Permit::Proceed,
        }
    }

    /// Time until the budget resets, if it is currently exhausted
    pub fn wait_hint(&self, now: DateTime<Utc>) -> Option<Duration> {
        match self.may_proceed(now) {
            Permit::Wait(duration) => Some(duration),
            Permit::Proceed => None,
        }
    }

    /// Copy of the current snapshot
    pub fn snapshot(&self) -> BudgetSnapshot {
        *self.lock()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BudgetSnapshot> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
