//! Retry policy for external collaborator calls.
//!
//! Anchor, telemetry, analytics and infrastructure calls are retried with
//! bounded backoff and an overall deadline. Exhausting the policy yields an
//! [`ExternalServiceError`]; callers treat that as advisory and never fail
//! the primary operation because of it.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::{ExternalServiceError, ServiceError, ServiceKind};

/// Backoff strategy between retry attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Backoff {
    /// Fixed delay between attempts.
    Fixed {
        /// Delay duration.
        #[serde(with = "humantime_serde")]
        delay: Duration,
    },

    /// Exponential backoff.
    Exponential {
        /// Initial delay.
        #[serde(with = "humantime_serde")]
        initial_delay: Duration,

        /// Maximum delay.
        #[serde(with = "humantime_serde")]
        max_delay: Duration,

        /// Multiplier for each retry (default: 2.0).
        #[serde(default = "default_multiplier")]
        multiplier: f64,
    },
}

const fn default_multiplier() -> f64 {
    2.0
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl Backoff {
    /// Calculate the delay for a given attempt number (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self {
            Self::Fixed { delay } => *delay,
            Self::Exponential {
                initial_delay,
                max_delay,
                multiplier,
            } => {
                let delay_secs =
                    initial_delay.as_secs_f64() * multiplier.powi((attempt - 1) as i32);
                let delay = Duration::from_secs_f64(delay_secs);
                delay.min(*max_delay)
            }
        }
    }
}

/// Retry policy applied to every external collaborator call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first (minimum 1).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff between attempts.
    #[serde(default)]
    pub backoff: Backoff,

    /// Overall deadline across all attempts of one call.
    #[serde(default = "default_deadline")]
    #[serde(with = "humantime_serde")]
    pub deadline: Duration,
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_deadline() -> Duration {
    Duration::from_secs(10)
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: Backoff::default(),
            deadline: default_deadline(),
        }
    }
}

impl RetryPolicy {
    /// Policy that performs a single attempt with no backoff.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::Fixed {
                delay: Duration::ZERO,
            },
            deadline: default_deadline(),
        }
    }

    /// Run `op` under this policy.
    ///
    /// Returns the first successful result, or an [`ExternalServiceError`]
    /// carrying the last failure reason and the number of attempts made.
    pub fn run<T, F>(&self, service: ServiceKind, mut op: F) -> Result<T, ExternalServiceError>
    where
        F: FnMut() -> Result<T, ServiceError>,
    {
        let started = Instant::now();
        let mut attempt: u32 = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let elapsed = started.elapsed();
                    if attempt >= self.max_attempts || elapsed >= self.deadline {
                        warn!(
                            service = %service,
                            attempts = attempt,
                            reason = %err,
                            "external call failed, giving up"
                        );
                        return Err(ExternalServiceError::new(service, err.0, attempt));
                    }

                    let delay = self
                        .backoff
                        .delay_for_attempt(attempt)
                        .min(self.deadline.saturating_sub(elapsed));
                    debug!(
                        service = %service,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        "external call failed, retrying"
                    );
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                    attempt += 1;
                }
            }
        }
    }
}
