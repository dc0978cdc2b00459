//! Bounded retry state machine for the checkin exchange.
//!
//! ```text
//! Idle -> Attempting -> Success
//!              |
//!              +-> RetryWait -> Attempting
//!              |
//!              +-> Failed
//! ```
//!
//! Only connection-level failures move to `RetryWait`; anything the server
//! answered goes straight to `Failed`.

use crate::error::NetworkError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Retry budget and backoff schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt, in milliseconds
    pub initial_backoff_ms: u64,
    /// Upper bound for any single delay, in milliseconds
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 4_000,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the total number of attempts
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the initial and maximum backoff
    pub fn backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff_ms = initial.as_millis() as u64;
        self.max_backoff_ms = max.as_millis() as u64;
        self
    }

    /// Delay after the given failed attempt (1-based): doubles each time, capped
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let delay = self.initial_backoff_ms.saturating_mul(1 << exponent);
        Duration::from_millis(delay.min(self.max_backoff_ms))
    }
}

/// Where the exchange currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// Nothing sent yet
    Idle,
    /// An attempt is in flight
    Attempting {
        /// 1-based attempt number
        attempt: u32,
    },
    /// Waiting before the next attempt
    RetryWait {
        /// Attempt that just failed
        attempt: u32,
        /// Delay before the next one
        delay: Duration,
    },
    /// An attempt succeeded
    Success {
        /// Attempts used
        attempts: u32,
    },
    /// Gave up
    Failed {
        /// Attempts used
        attempts: u32,
    },
}

/// What went wrong with a retryable attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCause {
    /// Connect, reset or a broken body
    Connection,
    /// The attempt ran past its own deadline
    Timeout,
}

/// How a single attempt failed
#[derive(Debug)]
pub enum AttemptError {
    /// Connection-level failure worth another attempt
    Retryable {
        /// Kind of failure
        cause: RetryCause,
        /// Description for logs and the final error
        message: String,
    },
    /// Failure that another attempt would reproduce
    Fatal(NetworkError),
}

impl AttemptError {
    /// A retryable connection failure
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Retryable {
            cause: RetryCause::Connection,
            message: message.into(),
        }
    }

    /// A retryable per-attempt timeout
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Retryable {
            cause: RetryCause::Timeout,
            message: message.into(),
        }
    }

    /// The error reported when this was the last attempt
    pub fn into_network(self, attempts: u32, elapsed: Duration) -> NetworkError {
        match self {
            Self::Retryable {
                cause: RetryCause::Timeout,
                ..
            } => NetworkError::Timeout { elapsed },
            Self::Retryable {
                cause: RetryCause::Connection,
                message,
            } => NetworkError::Connection { attempts, message },
            Self::Fatal(err) => err,
        }
    }
}

/// Explicit retry bookkeeping: state, attempt count, and start time
#[derive(Debug, Clone)]
pub struct RetryMachine {
    policy: RetryPolicy,
    state: RetryState,
    started: Option<Instant>,
}

impl RetryMachine {
    /// Creates an idle machine
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: RetryState::Idle,
            started: None,
        }
    }

    /// Current state
    pub fn state(&self) -> RetryState {
        self.state
    }

    /// Attempts started so far
    pub fn attempts(&self) -> u32 {
        match self.state {
            RetryState::Idle => 0,
            RetryState::Attempting { attempt } | RetryState::RetryWait { attempt, .. } => attempt,
            RetryState::Success { attempts } | RetryState::Failed { attempts } => attempts,
        }
    }

    /// Time since the first attempt started
    pub fn elapsed(&self) -> Duration {
        self.started.map(|s| s.elapsed()).unwrap_or_default()
    }

    /// Moves `Idle` or `RetryWait` to `Attempting`; `None` once terminal or already attempting
    pub fn start_attempt(&mut self) -> Option<u32> {
        let attempt = match self.state {
            RetryState::Idle => {
                self.started = Some(Instant::now());
                1
            }
            RetryState::RetryWait { attempt, .. } => attempt + 1,
            _ => return None,
        };
        self.state = RetryState::Attempting { attempt };
        Some(attempt)
    }

    /// Marks the in-flight attempt as successful
    pub fn succeed(&mut self) {
        if let RetryState::Attempting { attempt } = self.state {
            self.state = RetryState::Success { attempts: attempt };
        }
    }

    /// Records a failed attempt and returns the resulting state
    pub fn fail(&mut self, retryable: bool) -> RetryState {
        if let RetryState::Attempting { attempt } = self.state {
            self.state = if retryable && attempt < self.policy.max_attempts.max(1) {
                RetryState::RetryWait {
                    attempt,
                    delay: self.policy.delay_after(attempt),
                }
            } else {
                RetryState::Failed { attempts: attempt }
            };
        }
        self.state
    }
}

/// Drives `op` through the retry machine until it succeeds or the budget is spent.
///
/// `op` receives the 1-based attempt number. When the budget runs out, the
/// last attempt's cause decides between [`NetworkError::Timeout`] and
/// [`NetworkError::Connection`].
pub async fn run<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, NetworkError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AttemptError>>,
{
    let mut machine = RetryMachine::new(policy.clone());
    let mut last_error = AttemptError::connection("no attempt was made");

    while let Some(attempt) = machine.start_attempt() {
        trace!("Checkin attempt {}/{}", attempt, policy.max_attempts);

        match op(attempt).await {
            Ok(value) => {
                machine.succeed();
                return Ok(value);
            }
            Err(AttemptError::Fatal(err)) => {
                machine.fail(false);
                return Err(err);
            }
            Err(AttemptError::Retryable { cause, message }) => {
                debug!("Attempt {} failed ({:?}: {})", attempt, cause, message);
                last_error = AttemptError::Retryable { cause, message };
                match machine.fail(true) {
                    RetryState::RetryWait { delay, .. } => {
                        debug!("Retrying in {:?}", delay);
                        tokio::time::sleep(delay).await;
                    }
                    _ => {
                        debug!(
                            "Giving up after {} attempt(s) and {:?}",
                            machine.attempts(),
                            machine.elapsed()
                        );
                        break;
                    }
                }
            }
        }
    }

    Err(last_error.into_network(machine.attempts(), machine.elapsed()))
}
