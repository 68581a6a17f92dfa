use std::thread::sleep;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{RagError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transient,
    Client,
}

/// Maps an HTTP status to a failure class; `None` for success codes.
pub fn classify_status(status: u16) -> Option<FailureKind> {
    match status {
        200..=399 => None,
        429 => Some(FailureKind::Transient),
        400..=499 => Some(FailureKind::Client),
        _ => Some(FailureKind::Transient),
    }
}

/// Turns a non-success response into the matching error variant.
pub fn status_error(service: &'static str, status: u16, body: impl Into<String>) -> RagError {
    match classify_status(status) {
        Some(FailureKind::Client) => RagError::ClientService {
            service,
            status,
            message: body.into(),
        },
        _ => RagError::TransientService {
            service,
            attempts: 1,
            message: format!("status {status}: {}", body.into()),
        },
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    pub fn no_delay(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Delay before the retry following `attempt` (1-based): base * 2^(attempt-1), capped.
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as u32;
        let millis = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms.max(self.base_delay_ms));
        Duration::from_millis(millis)
    }

    pub fn attempts(&self) -> usize {
        self.max_attempts.max(1)
    }

    /// Runs `op` until it succeeds, fails with a non-transient error, or the
    /// attempt budget is spent.
    pub fn run<T>(&self, service: &'static str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let attempts = self.attempts();
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < attempts => {
                    let wait = self.delay_for(attempt);
                    warn!(service, attempt, ?wait, error = %err, "transient failure, retrying");
                    sleep(wait);
                }
                Err(RagError::TransientService { message, .. }) => {
                    return Err(RagError::TransientService {
                        service,
                        attempts: attempt,
                        message,
                    })
                }
                Err(err) => return Err(err),
            }
        }
    }
}
