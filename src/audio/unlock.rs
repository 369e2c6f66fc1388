//! Gesture-gated audio unlock.
//!
//! Output is not allowed to start until the user has interacted with the UI
//! once. The first gesture primes the output with a silent play; any playback
//! requested before that is parked as a single pending callback (newest wins)
//! and run as soon as the unlock succeeds.
//!
//! One [`AudioUnlock`] is shared (via `Arc`) by everything that starts audio
//! in a process, but it is owned and injected rather than reached through a
//! global.

use crate::error::Result;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

/// Deferred playback start.
pub type PendingPlayback = Box<dyn FnOnce() + Send + 'static>;

/// Kind of user interaction that may unlock audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gesture {
    Pointer,
    Touch,
    Key,
    Focus,
}

/// Unlock gate state.
#[derive(Default)]
pub struct AudioUnlock {
    unlocked: AtomicBool,
    unlocking: AtomicBool,
    primes: AtomicUsize,
    pending: Mutex<Option<PendingPlayback>>,
}

impl std::fmt::Debug for AudioUnlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioUnlock")
            .field("unlocked", &self.is_unlocked())
            .field("primes", &self.prime_count())
            .field("has_pending", &self.has_pending())
            .finish()
    }
}

impl AudioUnlock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gate that starts out unlocked (platforms without an autoplay policy).
    #[must_use]
    pub fn unlocked() -> Self {
        let gate = Self::default();
        gate.unlocked.store(true, Ordering::SeqCst);
        gate
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked.load(Ordering::SeqCst)
    }

    /// Number of times the priming side effect actually ran.
    pub fn prime_count(&self) -> usize {
        self.primes.load(Ordering::SeqCst)
    }

    pub fn has_pending(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Run `start` now if unlocked, otherwise park it until [`unlock_with`](Self::unlock_with).
    ///
    /// Returns `true` when playback was deferred.
    pub fn run_or_defer(&self, start: PendingPlayback) -> bool {
        if self.is_unlocked() {
            start();
            return false;
        }
        let replaced = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(start)
            .is_some();
        debug!(replaced, "playback deferred until audio unlock");

        // An unlock may have completed between the check and the park.
        if self.is_unlocked() {
            let raced = self
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(start) = raced {
                start();
                return false;
            }
        }
        true
    }

    /// Unlock audio by running `prime` (a silent, zero-volume play) exactly once.
    ///
    /// Returns `Ok(true)` when this call performed the unlock and `Ok(false)`
    /// when audio was already unlocked or another unlock is in flight. On
    /// success the pending playback, if any, is taken and run.
    ///
    /// # Errors
    ///
    /// Propagates the prime error; the gate stays locked so a later gesture retries.
    pub fn unlock_with<F>(&self, prime: F) -> Result<bool>
    where
        F: FnOnce() -> Result<()>,
    {
        if self.is_unlocked() || self.unlocking.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }

        let outcome = prime();
        self.primes.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = outcome {
            self.unlocking.store(false, Ordering::SeqCst);
            return Err(e);
        }

        self.unlocked.store(true, Ordering::SeqCst);
        self.unlocking.store(false, Ordering::SeqCst);
        info!("audio unlocked");

        let pending = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(start) = pending {
            debug!("flushing deferred playback");
            start();
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::error::AvatarError;
    use std::sync::Arc;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> PendingPlayback) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let make = move || {
            let c = Arc::clone(&c);
            Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }) as PendingPlayback
        };
        (count, make)
    }

    #[test]
    fn unlock_is_idempotent() {
        let gate = AudioUnlock::new();
        let primes = AtomicUsize::new(0);
        let prime = || {
            primes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        };
        assert!(gate.unlock_with(prime).unwrap());
        assert!(!gate.unlock_with(prime).unwrap());
        assert_eq!(primes.load(Ordering::SeqCst), 1);
        assert_eq!(gate.prime_count(), 1);
        assert!(gate.is_unlocked());
    }

    #[test]
    fn deferred_playback_replays_exactly_once() {
        let gate = AudioUnlock::new();
        let (count, make) = counter();

        assert!(gate.run_or_defer(make()));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(gate.has_pending());

        gate.unlock_with(|| Ok(())).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!gate.has_pending());

        gate.unlock_with(|| Ok(())).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn newest_deferred_request_wins() {
        let gate = AudioUnlock::new();
        let first = Arc::new(AtomicBool::new(false));
        let second = Arc::new(AtomicBool::new(false));
        let f = Arc::clone(&first);
        let s = Arc::clone(&second);
        gate.run_or_defer(Box::new(move || f.store(true, Ordering::SeqCst)));
        gate.run_or_defer(Box::new(move || s.store(true, Ordering::SeqCst)));

        gate.unlock_with(|| Ok(())).unwrap();
        assert!(!first.load(Ordering::SeqCst));
        assert!(second.load(Ordering::SeqCst));
    }

    #[test]
    fn unlocked_gate_runs_immediately() {
        let gate = AudioUnlock::unlocked();
        let (count, make) = counter();
        assert!(!gate.run_or_defer(make()));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_prime_keeps_gate_locked_and_pending() {
        let gate = AudioUnlock::new();
        let (count, make) = counter();
        gate.run_or_defer(make());

        let result = gate.unlock_with(|| Err(AvatarError::Audio("device busy".into())));
        assert!(result.is_err());
        assert!(!gate.is_unlocked());
        assert!(gate.has_pending());

        assert!(gate.unlock_with(|| Ok(())).unwrap());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
