//! Lost update: two transactions increment the same counter.
//!
//! Every committed increment must show up in the final value. Bodies the
//! engine aborts are not counted, so the check is
//! `final == initial + committed increments`.

use anomaly_common::IsolationLevel;
use anomaly_driver::{Database, HarnessResult, Param, Transaction};
use tracing::warn;

use super::{settle, UpdateStrategy};
use crate::retry::{retry_until, Attempt, RetryPolicy};
use crate::runner::{run_concurrently, Body};
use crate::schema;
use crate::trial::TrialOutcome;

pub const INITIAL: i64 = 0;
const BODIES: usize = 2;

const READ: &str = "SELECT counter FROM counters WHERE name = 'first'";
const READ_FOR_UPDATE: &str = "SELECT counter FROM counters WHERE name = 'first' FOR UPDATE";
const WRITE: &str = "UPDATE counters SET counter = $1 WHERE name = 'first'";
const ATOMIC_INCREMENT: &str = "UPDATE counters SET counter = counter + 1 WHERE name = 'first'";
const COMPARE_AND_SET: &str = "UPDATE counters SET counter = $1 WHERE name = 'first' AND counter = $2";

pub async fn run_trial(
    db: &Database,
    level: IsolationLevel,
    strategy: UpdateStrategy,
    retry: RetryPolicy,
) -> HarnessResult<TrialOutcome> {
    schema::reset_counters(db, &[("first", INITIAL)]).await?;

    let bodies: Vec<Body<()>> = (0..BODIES)
        .map(|_| {
            let db = db.clone();
            Box::pin(async move { increment(&db, level, strategy, retry).await }) as Body<()>
        })
        .collect();

    let mut conflicts = 0;
    let mut committed = 0;
    for result in run_concurrently(bodies).await {
        if settle(result, &mut conflicts)?.is_some() {
            committed += 1;
        }
    }

    let expected = INITIAL + committed;
    let actual = schema::read_counter(db, "first").await?;
    let outcome = if actual != expected {
        TrialOutcome::anomaly(format!(
            "final counter {}, expected {} after {} committed increments",
            actual, expected, committed
        ))
    } else {
        TrialOutcome::clean()
    };
    Ok(outcome.with_conflicts(conflicts))
}

/// Add one to `first` in its own transaction.
pub async fn increment(
    db: &Database,
    level: IsolationLevel,
    strategy: UpdateStrategy,
    retry: RetryPolicy,
) -> HarnessResult<()> {
    match strategy {
        UpdateStrategy::ReadModifyWrite => {
            db.transaction(level, |tx| {
                Box::pin(async move {
                    let value = tx.query_scalar(READ, &[]).await?;
                    tx.execute(WRITE, &[Param::Int(value + 1)]).await?;
                    Ok(())
                })
            })
            .await
        }
        UpdateStrategy::AtomicIncrement => {
            db.transaction(level, |tx| {
                Box::pin(async move {
                    tx.execute(ATOMIC_INCREMENT, &[]).await?;
                    Ok(())
                })
            })
            .await
        }
        UpdateStrategy::SelectForUpdate => {
            db.transaction(level, |tx| {
                Box::pin(async move {
                    let value = tx.query_scalar(READ_FOR_UPDATE, &[]).await?;
                    tx.execute(WRITE, &[Param::Int(value + 1)]).await?;
                    Ok(())
                })
            })
            .await
        }
        UpdateStrategy::CompareAndSet => {
            retry_until(retry, |_| async move {
                let mut tx = db.begin(level).await?;
                match compare_and_set(&mut tx).await {
                    Ok(true) => {
                        tx.commit().await?;
                        Ok(Attempt::Done(()))
                    }
                    Ok(false) => {
                        tx.rollback().await?;
                        Ok(Attempt::Retry)
                    }
                    Err(e) => {
                        if let Err(rollback_err) = tx.rollback().await {
                            warn!("Rollback after failed compare-and-set: {}", rollback_err);
                        }
                        Err(e)
                    }
                }
            })
            .await
        }
    }
}

/// Write `value + 1` only if the row still holds `value`.
async fn compare_and_set(tx: &mut Transaction) -> HarnessResult<bool> {
    let value = tx.query_scalar(READ, &[]).await?;
    let swapped = tx
        .execute(COMPARE_AND_SET, &[Param::Int(value + 1), Param::Int(value)])
        .await?;
    Ok(swapped == 1)
}
