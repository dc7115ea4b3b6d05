use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

/// Claim/release gate with at most one holder. Contenders are rejected,
/// never queued.
#[derive(Debug)]
pub struct SingleFlight {
    name: &'static str,
    held: Arc<AtomicBool>,
}

/// Proof of holding a [`SingleFlight`]. Dropping it releases the gate, so a
/// claim is released exactly once.
#[derive(Debug)]
#[must_use = "dropping the guard releases the lock immediately"]
pub struct FlightGuard {
    name: &'static str,
    held: Arc<AtomicBool>,
}

impl SingleFlight {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            held: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn try_claim(&self) -> Option<FlightGuard> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        debug!(lock = self.name, "claimed");
        Some(FlightGuard {
            name: self.name,
            held: Arc::clone(&self.held),
        })
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

impl FlightGuard {
    pub fn release(self) {}
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.held.store(false, Ordering::Release);
        debug!(lock = self.name, "released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_is_rejected_until_release() {
        let lock = SingleFlight::new("op");
        let guard = lock.try_claim().expect("first claim");
        assert!(lock.is_held());
        assert!(lock.try_claim().is_none());

        guard.release();
        assert!(!lock.is_held());
        assert!(lock.try_claim().is_some());
    }

    #[test]
    fn dropping_guard_releases() {
        let lock = SingleFlight::new("op");
        {
            let _guard = lock.try_claim().unwrap();
        }
        assert!(!lock.is_held());
    }
}
