//! A lock-free progress and cancellation facet shared between a long-running
//! search and whatever is driving it (a CLI progress bar, a `Ctrl-C`
//! handler, or an early-exit once a caller-supplied stop condition is met).

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// The three states a running search can be in.
///
/// Encoded as a small integer rather than an enum behind a mutex so that
/// every worker thread can check it with a single relaxed-ish atomic load
/// per iteration without contending on a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProgressState {
    /// The search is running normally.
    Normal = 0,
    /// The search was canceled from the outside (e.g. `Ctrl-C`) and should
    /// stop as soon as convenient, reporting no solution.
    Canceled = 1,
    /// The search found what it needed and should stop as soon as
    /// convenient, keeping what it already found.
    EarlyExit = 2,
}

impl ProgressState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Canceled,
            2 => Self::EarlyExit,
            _ => Self::Normal,
        }
    }
}

/// Shared counters tracking how far a search has advanced and whether it
/// should stop.
///
/// Cheap to clone (it is just an `Arc` in practice, or can be shared as
/// `&Progress` across scoped threads): all mutable state lives behind
/// atomics, so no locking is needed to report progress from worker threads.
#[derive(Debug, Default)]
pub struct Progress {
    done: AtomicU64,
    total: AtomicU64,
    state: AtomicU8,
}

impl Progress {
    /// Create a tracker for a search of `total` units of work.
    #[must_use]
    pub fn new(total: u64) -> Self {
        Self {
            done: AtomicU64::new(0),
            total: AtomicU64::new(total),
            state: AtomicU8::new(ProgressState::Normal as u8),
        }
    }

    /// Advance the done counter by `n` units.
    pub fn advance(&self, n: u64) {
        self.done.fetch_add(n, Ordering::Relaxed);
    }

    /// How many units of work have been completed so far.
    #[must_use]
    pub fn done(&self) -> u64 {
        self.done.load(Ordering::Relaxed)
    }

    /// The total number of units of work, set at construction time.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Raise or lower the total, e.g. once the real search space is known.
    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }

    /// Zero the done counter and set a new total, e.g. when starting a new
    /// phase of work such as the next password length.
    pub fn reset(&self, total: u64) {
        self.done.store(0, Ordering::Relaxed);
        self.total.store(total, Ordering::Relaxed);
    }

    /// The current cancellation / completion state.
    #[must_use]
    pub fn state(&self) -> ProgressState {
        ProgressState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether a worker should stop looking for more solutions, for any
    /// reason.
    #[must_use]
    pub fn should_stop(&self) -> bool {
        self.state.load(Ordering::Acquire) != ProgressState::Normal as u8
    }

    /// Request cancellation, e.g. from a `Ctrl-C` handler. Has no effect if
    /// the search has already reached [`ProgressState::EarlyExit`].
    pub fn cancel(&self) {
        let _ = self.state.compare_exchange(
            ProgressState::Normal as u8,
            ProgressState::Canceled as u8,
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
    }

    /// Signal that the search found what it needed and can stop early,
    /// keeping results found so far. Has no effect if cancellation was
    /// already requested.
    pub fn early_exit(&self) {
        let _ = self.state.compare_exchange(
            ProgressState::Normal as u8,
            ProgressState::EarlyExit as u8,
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_normal_and_zero() {
        let p = Progress::new(100);
        assert_eq!(p.done(), 0);
        assert_eq!(p.total(), 100);
        assert_eq!(p.state(), ProgressState::Normal);
        assert!(!p.should_stop());
    }

    #[test]
    fn test_advance_accumulates() {
        let p = Progress::new(10);
        p.advance(3);
        p.advance(4);
        assert_eq!(p.done(), 7);
    }

    #[test]
    fn test_cancel_sets_state_and_should_stop() {
        let p = Progress::new(10);
        p.cancel();
        assert_eq!(p.state(), ProgressState::Canceled);
        assert!(p.should_stop());
    }

    #[test]
    fn test_early_exit_sets_state_and_should_stop() {
        let p = Progress::new(10);
        p.early_exit();
        assert_eq!(p.state(), ProgressState::EarlyExit);
        assert!(p.should_stop());
    }

    #[test]
    fn test_cancel_does_not_override_early_exit() {
        let p = Progress::new(10);
        p.early_exit();
        p.cancel();
        assert_eq!(p.state(), ProgressState::EarlyExit);
    }

    #[test]
    fn test_early_exit_does_not_override_cancel() {
        let p = Progress::new(10);
        p.cancel();
        p.early_exit();
        assert_eq!(p.state(), ProgressState::Canceled);
    }

    #[test]
    fn test_set_total_updates_reading() {
        let p = Progress::new(10);
        p.set_total(42);
        assert_eq!(p.total(), 42);
    }

    #[test]
    fn test_reset_zeroes_done_and_sets_total() {
        let p = Progress::new(10);
        p.advance(7);
        p.reset(99);
        assert_eq!(p.done(), 0);
        assert_eq!(p.total(), 99);
    }
}
