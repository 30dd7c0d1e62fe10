//! Write skew: each transaction checks "no counters yet" and inserts one.
//!
//! Neither body writes what the other read, so only serializable isolation,
//! or a lock on something both bodies touch, keeps the table at one row.

use anomaly_common::IsolationLevel;
use anomaly_driver::{Database, HarnessResult, Param, Transaction};

use super::{settle, SkewGuard};
use crate::runner::{run_concurrently, Body};
use crate::schema::{self, COUNTERS_LOCK};
use crate::trial::TrialOutcome;

const COUNT: &str = "SELECT COUNT(*) FROM counters";
const INSERT: &str = "INSERT INTO counters (name, counter) VALUES ($1, 0)";
const LOCK_SENTINEL: &str = "SELECT name FROM materialized_locks WHERE name = $1 FOR UPDATE";
// Snapshot engines raise a write-write conflict only for rows actually
// written, so the sentinel is touched as well as locked.
const TOUCH_SENTINEL: &str = "UPDATE materialized_locks SET name = name WHERE name = $1";

pub async fn run_trial(db: &Database, level: IsolationLevel, guard: SkewGuard) -> HarnessResult<TrialOutcome> {
    schema::reset_counters(db, &[]).await?;
    if guard == SkewGuard::MaterializedLock {
        schema::reset_locks(db).await?;
    }

    let bodies: Vec<Body<bool>> = ["first", "second"]
        .into_iter()
        .map(|name| {
            let db = db.clone();
            Box::pin(async move { insert_if_empty(&db, level, guard, name).await }) as Body<bool>
        })
        .collect();

    let mut conflicts = 0;
    let mut committed = 0;
    for result in run_concurrently(bodies).await {
        if settle(result, &mut conflicts)?.is_some() {
            committed += 1;
        }
    }

    // Every committed body saw an empty table or a table with one row, so
    // exactly one row must remain if any body committed.
    let expected = if committed > 0 { 1 } else { 0 };
    let actual = schema::count_counters(db).await?;
    let outcome = if actual != expected {
        TrialOutcome::anomaly(format!(
            "found {} counters, expected {} ({} bodies committed)",
            actual, expected, committed
        ))
    } else {
        TrialOutcome::clean()
    };
    Ok(outcome.with_conflicts(conflicts))
}

/// Insert `name` if `counters` is empty; returns whether it inserted.
pub async fn insert_if_empty(
    db: &Database,
    level: IsolationLevel,
    guard: SkewGuard,
    name: &'static str,
) -> HarnessResult<bool> {
    db.transaction(level, |tx| {
        Box::pin(async move {
            if guard == SkewGuard::MaterializedLock {
                lock_sentinel(tx).await?;
            }
            if tx.query_scalar(COUNT, &[]).await? == 0 {
                tx.execute(INSERT, &[Param::from(name)]).await?;
                Ok(true)
            } else {
                Ok(false)
            }
        })
    })
    .await
}

async fn lock_sentinel(tx: &mut Transaction) -> HarnessResult<()> {
    tx.execute(LOCK_SENTINEL, &[Param::from(COUNTERS_LOCK)]).await?;
    tx.execute(TOUCH_SENTINEL, &[Param::from(COUNTERS_LOCK)]).await?;
    Ok(())
}
