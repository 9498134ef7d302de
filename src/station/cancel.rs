//! Cooperative cancellation for blocking loops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::StationError;

/// Longest a blocking wait goes without looking at the token.
pub const CANCEL_POLL: Duration = Duration::from_millis(100);

/// Set once by whoever wants the driver to stop; checked at every blocking point.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), StationError> {
        if self.is_cancelled() {
            return Err(StationError::Cancelled);
        }
        Ok(())
    }

    /// Sleep for `duration` in slices, returning early with `Cancelled`.
    pub fn sleep(&self, duration: Duration) -> Result<(), StationError> {
        let deadline = Instant::now() + duration;
        loop {
            self.check()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            thread::sleep((deadline - now).min(CANCEL_POLL));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_after_cancel() {
        let token = CancelToken::new();
        assert!(token.check().is_ok());
        token.clone().cancel();
        assert!(matches!(token.check(), Err(StationError::Cancelled)));
    }

    #[test]
    fn test_sleep_returns_early_when_cancelled() {
        let token = CancelToken::new();
        let canceller = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            canceller.cancel();
        });

        let start = Instant::now();
        let result = token.sleep(Duration::from_secs(30));
        handle.join().unwrap();

        assert!(matches!(result, Err(StationError::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_zero_sleep() {
        assert!(CancelToken::new().sleep(Duration::ZERO).is_ok());
    }
}
