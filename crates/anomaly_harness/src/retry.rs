use std::future::Future;

use anomaly_common::RetrySettings;
use anomaly_driver::{HarnessError, HarnessResult};
use tracing::debug;

/// Result of one attempt: either the value, or "condition not met yet".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt<T> {
    Done(T),
    Retry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// `None` retries until the condition holds.
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 100;

    pub fn bounded(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
        }
    }

    pub fn unbounded() -> Self {
        Self { max_attempts: None }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::bounded(Self::DEFAULT_MAX_ATTEMPTS)
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
        }
    }
}

/// Call `op(attempt)` (1-based) until it yields [`Attempt::Done`].
///
/// Errors from `op` end the loop immediately; only [`Attempt::Retry`] is
/// retried. Running out of attempts yields
/// [`HarnessError::RetriesExhausted`].
pub async fn retry_until<T, F, Fut>(policy: RetryPolicy, mut op: F) -> HarnessResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = HarnessResult<Attempt<T>>>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt = attempt.saturating_add(1);
        match op(attempt).await? {
            Attempt::Done(value) => {
                if attempt > 1 {
                    debug!("Condition met on attempt {}", attempt);
                }
                return Ok(value);
            }
            Attempt::Retry => {
                if policy.max_attempts.is_some_and(|max| attempt >= max) {
                    return Err(HarnessError::RetriesExhausted { attempts: attempt });
                }
                tokio::task::yield_now().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_done_first_attempt() {
        let v = retry_until(RetryPolicy::default(), |_| async { Ok(Attempt::Done(7)) })
            .await
            .unwrap();
        assert_eq!(v, 7);
    }

    #[tokio::test]
    async fn test_retries_until_condition_holds() {
        let mut seen = Vec::new();
        let v = retry_until(RetryPolicy::bounded(5), |attempt| {
            seen.push(attempt);
            async move {
                if attempt < 3 {
                    Ok(Attempt::Retry)
                } else {
                    Ok(Attempt::Done(attempt))
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(v, 3);
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_attempts() {
        let err = retry_until(RetryPolicy::bounded(4), |_| async { Ok(Attempt::<()>::Retry) })
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::RetriesExhausted { attempts: 4 }));
    }

    #[tokio::test]
    async fn test_error_is_not_retried() {
        let mut calls = 0;
        let err = retry_until(RetryPolicy::bounded(10), |_| {
            calls += 1;
            async {
                Err::<Attempt<()>, _>(HarnessError::SerializationConflict {
                    sqlstate: "40001".into(),
                    message: "could not serialize access".into(),
                })
            }
        })
        .await
        .unwrap_err();
        assert!(err.is_serialization_conflict());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_unbounded_keeps_going() {
        let v = retry_until(RetryPolicy::unbounded(), |attempt| async move {
            if attempt < 1_000 {
                Ok(Attempt::Retry)
            } else {
                Ok(Attempt::Done(attempt))
            }
        })
        .await
        .unwrap();
        assert_eq!(v, 1_000);
    }

    #[test]
    fn test_policy_from_settings() {
        let settings = RetrySettings { max_attempts: None };
        assert_eq!(RetryPolicy::from(&settings), RetryPolicy::unbounded());
        assert_eq!(RetryPolicy::default().max_attempts, Some(100));
    }
}
