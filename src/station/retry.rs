//! Retry budgets.
//!
//! Budgets are plain values: each failure is absorbed into a new budget or turned into the
//! error the caller should give up with.

use std::time::Duration;

use super::StationError;

/// Timeouts and retry counts for the session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Timeouts tolerated per phase before the phase fails.
    pub retry_count: u32,
    /// Timeout of each receive or accept.
    pub timeout: Duration,
    /// Cooldown after a socket failure.
    pub retry_wait: Duration,
    /// Socket failures tolerated before giving up for good.
    pub max_retry: u32,
    /// Full discovery/connect/setup sequences before giving up.
    pub connect_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_count: 5,
            timeout: Duration::from_secs(5),
            retry_wait: Duration::from_secs(5),
            max_retry: 3,
            connect_attempts: 10,
        }
    }
}

impl RetryPolicy {
    /// No waiting and short timeouts, for simulated stations.
    pub fn immediate() -> Self {
        Self {
            retry_count: 2,
            timeout: Duration::from_millis(10),
            retry_wait: Duration::ZERO,
            max_retry: 2,
            connect_attempts: 3,
        }
    }

    /// A fresh budget for one phase.
    pub fn budget(&self) -> RetryBudget {
        RetryBudget::new(self.retry_count, self.max_retry)
    }
}

/// What is left to spend on timeouts and socket failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    timeouts: u32,
    network: u32,
}

impl RetryBudget {
    pub fn new(timeouts: u32, network: u32) -> Self {
        Self { timeouts, network }
    }

    pub fn timeouts_left(&self) -> u32 {
        self.timeouts
    }

    pub fn network_left(&self) -> u32 {
        self.network
    }

    /// Same socket-failure budget with the timeout allowance topped up.
    pub fn with_timeouts(self, timeouts: u32) -> Self {
        Self { timeouts, ..self }
    }

    /// Spend one retry on `err`.
    ///
    /// An exhausted timeout allowance hands the timeout back; an exhausted socket-failure
    /// budget is fatal. Errors that are not retryable are returned unchanged.
    pub fn absorb(self, err: StationError, phase: &str) -> Result<Self, StationError> {
        match err {
            StationError::Timeout(_) if self.timeouts > 0 => Ok(Self {
                timeouts: self.timeouts - 1,
                ..self
            }),
            StationError::Transport(_) if self.network > 0 => Ok(Self {
                network: self.network - 1,
                ..self
            }),
            StationError::Transport(msg) => Err(StationError::RetriesExceeded(format!(
                "{}: {}",
                phase, msg
            ))),
            other => Err(other),
        }
    }
}
