//! Fixed-delay retry around any async operation.
//!
//! A [`RetryPolicy`] names the delay, an optional attempt cap and a classifier deciding which
//! errors are worth another attempt. [`retry`] drives the operation and reports how many
//! attempts it took either way.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision { Retry, Abort }

pub struct RetryPolicy<E> {
    pub delay: Duration,
    /// `None` retries without bound.
    pub max_attempts: Option<u32>,
    pub classifier: fn(&E) -> RetryDecision,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self { *self }
}
impl<E> Copy for RetryPolicy<E> {}

impl<E> std::fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy").field("delay", &self.delay).field("max_attempts", &self.max_attempts).finish()
    }
}

impl<E> RetryPolicy<E> {
    /// Retry every error, forever.
    pub fn forever(delay: Duration) -> Self {
        Self { delay, max_attempts: None, classifier: |_| RetryDecision::Retry }
    }

    pub fn with_classifier(delay: Duration, classifier: fn(&E) -> RetryDecision) -> Self {
        Self { delay, max_attempts: None, classifier }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self { self.max_attempts = Some(attempts); self }
}

/// Errors that know whether they are worth retrying.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for crate::error::ChainError {
    fn is_transient(&self) -> bool { crate::error::ChainError::is_transient(self) }
}
impl Transient for crate::error::BuildError {
    fn is_transient(&self) -> bool { crate::error::BuildError::is_transient(self) }
}
impl Transient for crate::error::ParamsError {
    fn is_transient(&self) -> bool {
        matches!(self, crate::error::ParamsError::Chain(e) if e.is_transient())
    }
}

impl<E: Transient> RetryPolicy<E> {
    /// Retry only transient errors, forever.
    pub fn transient(delay: Duration) -> Self {
        Self::with_classifier(delay, |e| if e.is_transient() { RetryDecision::Retry } else { RetryDecision::Abort })
    }
}

#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    Retried { value: T, attempts: u32 },
    Aborted { error: E, attempts: u32 },
}

impl<T, E> RetryOutcome<T, E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Retried { attempts, .. } | RetryOutcome::Aborted { attempts, .. } => *attempts,
        }
    }

    pub fn into_result(self) -> Result<T, E> {
        match self {
            RetryOutcome::Retried { value, .. } => Ok(value),
            RetryOutcome::Aborted { error, .. } => Err(error),
        }
    }
}

/// Run `op` until it succeeds, the classifier aborts, or the attempt cap is hit.
/// Sleeps `policy.delay` between attempts, never after the last one.
pub async fn retry<F, Fut, T, E>(policy: &RetryPolicy<E>, label: &str, mut op: F) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match op(attempts).await {
            Ok(value) => return RetryOutcome::Retried { value, attempts },
            Err(error) => {
                let exhausted = policy.max_attempts.is_some_and(|max| attempts >= max);
                if exhausted || (policy.classifier)(&error) == RetryDecision::Abort {
                    return RetryOutcome::Aborted { error, attempts };
                }
                warn!(op = label, attempt = attempts, error = %error, delay_ms = policy.delay.as_millis() as u64, "Retrying");
                sleep(policy.delay).await;
            }
        }
    }
}
