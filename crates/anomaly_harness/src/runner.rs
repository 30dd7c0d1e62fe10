//! Concurrent scenario runner.
//!
//! Every body runs as its own tokio task and the caller gets control back
//! only once all of them have terminated. There is no partial-completion
//! path and no ordering between bodies.

use std::future::Future;

use anomaly_driver::{BoxFuture, HarnessError, HarnessResult};
use tokio::task::JoinError;
use tracing::warn;

/// One concurrent transaction body.
pub type Body<T> = BoxFuture<'static, HarnessResult<T>>;

/// Run all bodies concurrently; results come back in input order.
///
/// A panicking body yields [`HarnessError::BodyPanicked`] in its own slot
/// and leaves the other slots untouched.
pub async fn run_concurrently<T>(bodies: Vec<Body<T>>) -> Vec<HarnessResult<T>>
where
    T: Send + 'static,
{
    let handles: Vec<_> = bodies.into_iter().map(tokio::spawn).collect();

    let mut results = Vec::with_capacity(handles.len());
    for (index, handle) in handles.into_iter().enumerate() {
        results.push(handle.await.unwrap_or_else(|e| Err(body_failed(index, e))));
    }
    results
}

/// Two bodies with different result types, e.g. a writer and a reader.
pub async fn run_pair<A, B, FA, FB>(a: FA, b: FB) -> (HarnessResult<A>, HarnessResult<B>)
where
    A: Send + 'static,
    B: Send + 'static,
    FA: Future<Output = HarnessResult<A>> + Send + 'static,
    FB: Future<Output = HarnessResult<B>> + Send + 'static,
{
    let first = tokio::spawn(a);
    let second = tokio::spawn(b);

    let a = first.await.unwrap_or_else(|e| Err(body_failed(0, e)));
    let b = second.await.unwrap_or_else(|e| Err(body_failed(1, e)));
    (a, b)
}

fn body_failed(body: usize, err: JoinError) -> HarnessError {
    let message = if err.is_panic() {
        let payload = err.into_panic();
        payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string())
    } else {
        err.to_string()
    };
    warn!("Concurrent body {} did not complete: {}", body, message);
    HarnessError::BodyPanicked { body, message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Barrier;

    #[tokio::test]
    async fn test_results_in_input_order() {
        let bodies: Vec<Body<u32>> = (0..4u32)
            .map(|i| {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(u64::from(4 - i) * 5)).await;
                    Ok(i)
                }) as Body<u32>
            })
            .collect();
        let results = run_concurrently(bodies).await;
        let values: Vec<u32> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![0, 1, 2, 3]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_bodies_overlap() {
        // Each body waits for the other; sequential execution would hang.
        let barrier = Arc::new(Barrier::new(2));
        let bodies: Vec<Body<()>> = (0..2)
            .map(|_| {
                let barrier = barrier.clone();
                Box::pin(async move {
                    barrier.wait().await;
                    Ok(())
                }) as Body<()>
            })
            .collect();
        let results = tokio::time::timeout(Duration::from_secs(5), run_concurrently(bodies))
            .await
            .expect("bodies did not run concurrently");
        assert!(results.iter().all(|r| r.is_ok()));
    }

    #[tokio::test]
    async fn test_panic_isolated_to_its_slot() {
        let bodies: Vec<Body<u32>> = vec![
            Box::pin(async { Ok(1) }),
            Box::pin(async {
                if true {
                    panic!("body exploded");
                }
                Ok(2)
            }),
            Box::pin(async { Ok(3) }),
        ];
        let results = run_concurrently(bodies).await;
        assert_eq!(results[0].as_ref().unwrap(), &1);
        match &results[1] {
            Err(HarnessError::BodyPanicked { body, message }) => {
                assert_eq!(*body, 1);
                assert!(message.contains("body exploded"));
            }
            other => panic!("expected BodyPanicked, got {:?}", other),
        }
        assert_eq!(results[2].as_ref().unwrap(), &3);
    }

    #[tokio::test]
    async fn test_body_errors_are_returned() {
        let bodies: Vec<Body<()>> = vec![
            Box::pin(async {
                Err(HarnessError::SerializationConflict {
                    sqlstate: "40001".into(),
                    message: "could not serialize access".into(),
                })
            }),
            Box::pin(async { Ok(()) }),
        ];
        let results = run_concurrently(bodies).await;
        assert!(results[0].as_ref().unwrap_err().is_serialization_conflict());
        assert!(results[1].is_ok());
    }

    #[tokio::test]
    async fn test_run_pair_heterogeneous() {
        let (a, b) = run_pair(async { Ok(()) }, async { Ok::<_, HarnessError>(10i64) }).await;
        assert!(a.is_ok());
        assert_eq!(b.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_run_pair_waits_for_both_after_panic() {
        let finished = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = finished.clone();
        let (a, b) = run_pair(
            async {
                if true {
                    panic!("writer died");
                }
                Ok::<_, HarnessError>(())
            },
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok::<_, HarnessError>(())
            },
        )
        .await;
        assert!(matches!(a, Err(HarnessError::BodyPanicked { body: 0, .. })));
        assert!(b.is_ok());
        assert!(finished.load(std::sync::atomic::Ordering::SeqCst));
    }
}
