use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::millis;
use crate::error::Result;

/// Bounded retry for register operations.
///
/// Only failures for which [`DeviceError::is_retryable`] holds are retried,
/// and the link is resynchronised before each new attempt. The default is a
/// single attempt, so errors surface unchanged.
///
/// [`DeviceError::is_retryable`]: crate::DeviceError::is_retryable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first. Zero is treated as one.
    pub max_attempts: u32,
    /// Pause before each retry.
    #[serde(rename = "backoff_ms", with = "millis")]
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::from_millis(10),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Run `op` against `target`, calling `recover` between failed attempts.
    ///
    /// A failing `recover` ends the loop with its own error.
    pub fn run<S: ?Sized, T>(
        &self,
        target: &mut S,
        mut op: impl FnMut(&mut S) -> Result<T>,
        mut recover: impl FnMut(&mut S) -> Result<()>,
    ) -> Result<T> {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(target) {
                Ok(value) => return Ok(value),
                Err(err) if attempt < attempts && err.is_retryable() => {
                    debug!(attempt, max = attempts, error = %err, "retrying after failure");
                    std::thread::sleep(self.backoff);
                    recover(target)?;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use harpio_transport::TransportError;

    use super::*;
    use crate::error::DeviceError;

    #[derive(Default)]
    struct Counters {
        calls: u32,
        recovered: u32,
    }

    fn timeout() -> DeviceError {
        DeviceError::Transport(TransportError::Timeout {
            expected: 2,
            received: 0,
            timeout: Duration::from_millis(1),
        })
    }

    fn recover(counters: &mut Counters) -> Result<()> {
        counters.recovered += 1;
        Ok(())
    }

    #[test]
    fn default_is_single_attempt() {
        let mut counters = Counters::default();
        let result: Result<()> = RetryPolicy::default().run(
            &mut counters,
            |c| {
                c.calls += 1;
                Err(timeout())
            },
            recover,
        );
        assert!(result.unwrap_err().is_timeout());
        assert_eq!(counters.calls, 1);
        assert_eq!(counters.recovered, 0);
    }

    #[test]
    fn retries_transient_failures_with_recovery() {
        let mut counters = Counters::default();
        let policy = RetryPolicy::attempts(3).with_backoff(Duration::ZERO);
        let value = policy
            .run(
                &mut counters,
                |c| {
                    c.calls += 1;
                    if c.calls < 3 {
                        Err(timeout())
                    } else {
                        Ok(7)
                    }
                },
                recover,
            )
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(counters.calls, 3);
        assert_eq!(counters.recovered, 2);
    }

    #[test]
    fn permanent_failures_are_not_retried() {
        let mut counters = Counters::default();
        let policy = RetryPolicy::attempts(5).with_backoff(Duration::ZERO);
        let result: Result<()> = policy.run(
            &mut counters,
            |c| {
                c.calls += 1;
                Err(DeviceError::NotConnected)
            },
            recover,
        );
        assert!(matches!(result, Err(DeviceError::NotConnected)));
        assert_eq!(counters.calls, 1);
    }

    #[test]
    fn failed_recovery_ends_the_loop() {
        let mut counters = Counters::default();
        let policy = RetryPolicy::attempts(5).with_backoff(Duration::ZERO);
        let result: Result<()> = policy.run(
            &mut counters,
            |c| {
                c.calls += 1;
                Err(timeout())
            },
            |_| Err(DeviceError::NotConnected),
        );
        assert!(matches!(result, Err(DeviceError::NotConnected)));
        assert_eq!(counters.calls, 1);
    }

    #[test]
    fn deserializes_with_defaults() {
        let policy: RetryPolicy = serde_json::from_str(r#"{"max_attempts": 4}"#).unwrap();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.backoff, Duration::from_millis(10));

        let policy: RetryPolicy =
            serde_json::from_str(r#"{"max_attempts": 2, "backoff_ms": 250}"#).unwrap();
        assert_eq!(policy.backoff, Duration::from_millis(250));
    }
}
