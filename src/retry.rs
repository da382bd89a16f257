//! Bounded retry for durable-store access.
//!
//! [`RetryPolicy`] guards hot-path repository calls against transient
//! contention: a low attempt ceiling with a fixed short pause between
//! attempts. It is not meant to ride out network partitions.
//!
//! Classification is a plain function pointer so individual call sites can
//! override it. The default treats every error except "record not found" as
//! retryable.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::telemetry;
use crate::{HeimdallError, Result};

/// Decides whether an error may be retried.
pub type Classifier = fn(&HeimdallError) -> bool;

/// Default classification: "record not found" is permanent, everything else
/// is transient.
pub fn retry_unless_not_found(err: &HeimdallError) -> bool {
    !err.is_not_found()
}

/// Configuration for retrying durable-store operations.
///
/// ```rust
/// # use heimdall::RetryPolicy;
/// # use std::time::Duration;
/// let policy = RetryPolicy::new()
///     .max_attempts(3)
///     .delay(Duration::from_millis(2));
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first one).
    /// 1 = no retry. Default: 4.
    pub max_attempts: u32,
    /// Fixed pause between attempts. Default: 1ms.
    pub delay: Duration,
    /// Retryability predicate. Default: [`retry_unless_not_found`].
    pub classifier: Classifier,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            delay: Duration::from_millis(1),
            classifier: retry_unless_not_found,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the default budget.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a policy that never retries (single attempt).
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Set maximum attempts (including the first one).
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n.max(1);
        self
    }

    /// Set the pause between attempts.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Override which errors are retried.
    pub fn classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Run `f` until it succeeds, fails permanently, or the attempt budget
    /// runs out. The last error is returned on exhaustion.
    pub async fn retry<F, Fut, T>(&self, operation: &str, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if !(self.classifier)(&e) => return Err(e),
                Err(e) if attempt >= self.max_attempts => return Err(e),
                Err(e) => {
                    metrics::counter!(telemetry::RETRIES_TOTAL, "operation" => operation.to_owned())
                        .increment(1);
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "store operation failed, retrying"
                    );
                    tokio::time::sleep(self.delay).await;
                }
            }
        }
    }
}
