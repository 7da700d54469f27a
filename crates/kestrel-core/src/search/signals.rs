//! Stop and ponder flags shared by every search thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::sleep;
use std::time::Duration;

/// Observable state of the signal protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchState {
    Searching,
    Pondering,
    StopRequested,
}

/// Atomic flags read and written from any thread.
///
/// `stop` aborts all searching. `stop_on_ponderhit` turns a later ponderhit
/// into an immediate stop; it is raised when a ponder search has already
/// used up its time or finished its last iteration.
#[derive(Debug, Default)]
pub struct Signals {
    stop: AtomicBool,
    stop_on_ponderhit: AtomicBool,
    pondering: AtomicBool,
}

impl Signals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears all flags before a new search.
    pub fn reset(&self, pondering: bool) {
        self.stop.store(false, Ordering::Release);
        self.stop_on_ponderhit.store(false, Ordering::Release);
        self.pondering.store(pondering, Ordering::Release);
    }

    #[inline]
    pub fn stop(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    #[inline]
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    #[inline]
    pub fn stop_on_ponderhit(&self) -> bool {
        self.stop_on_ponderhit.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_stop_on_ponderhit(&self, value: bool) {
        self.stop_on_ponderhit.store(value, Ordering::Release);
    }

    #[inline]
    pub fn is_pondering(&self) -> bool {
        self.pondering.load(Ordering::Acquire)
    }

    /// The opponent played the expected move: continue as a normal search,
    /// or stop right away if the search already decided it was done.
    pub fn ponderhit(&self) {
        self.pondering.store(false, Ordering::Release);
        if self.stop_on_ponderhit() {
            self.request_stop();
        }
    }

    /// Blocks while an infinite or ponder search has nothing left to do but
    /// must not report yet. Returns once `stop` is set or pondering ends on a
    /// finite search.
    pub fn wait_for_release(&self, infinite: bool) {
        while !self.stop() && (infinite || self.is_pondering()) {
            self.set_stop_on_ponderhit(true);
            sleep(Duration::from_millis(1));
        }
    }

    pub fn state(&self) -> SearchState {
        if self.stop() {
            SearchState::StopRequested
        } else if self.is_pondering() {
            SearchState::Pondering
        } else {
            SearchState::Searching
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// Ponderhit converts to a stop only when `stop_on_ponderhit` was raised.
    #[test]
    fn test_ponderhit_transitions() {
        let signals = Signals::new();
        signals.reset(true);
        assert_eq!(signals.state(), SearchState::Pondering);

        signals.ponderhit();
        assert_eq!(signals.state(), SearchState::Searching);

        signals.reset(true);
        signals.set_stop_on_ponderhit(true);
        signals.ponderhit();
        assert_eq!(signals.state(), SearchState::StopRequested);
    }

    /// A stop raised on another thread releases the waiter.
    #[test]
    fn test_wait_for_release() {
        let signals = Arc::new(Signals::new());
        signals.reset(false);
        let remote = Arc::clone(&signals);
        let handle = std::thread::spawn(move || {
            sleep(Duration::from_millis(20));
            remote.request_stop();
        });
        signals.wait_for_release(true);
        assert!(signals.stop());
        handle.join().unwrap();
    }
}
