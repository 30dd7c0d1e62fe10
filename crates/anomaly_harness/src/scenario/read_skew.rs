//! Read skew: a reader sees parts of the database at different points in time.
//!
//! Multi-object: the writer sets two counters together, the reader reads one
//! then the other. Single-object (non-repeatable read): the reader reads the
//! same counter twice.
//!
//! The writer is a one-round-trip script. The reader issues its two reads as
//! separate round trips inside one transaction, so the writer can commit
//! between them.

use anomaly_common::{IsolationLevel, TxOptions};
use anomaly_driver::{Database, HarnessResult, TxnScript};

use super::settle;
use crate::runner::run_pair;
use crate::schema;
use crate::trial::TrialOutcome;

const READ_FIRST: &str = "SELECT counter FROM counters WHERE name = 'first'";
const READ_SECOND: &str = "SELECT counter FROM counters WHERE name = 'second'";

pub fn multi_object_writer(level: IsolationLevel) -> TxnScript {
    TxnScript::new()
        .isolation(level)
        .statement("UPDATE counters SET counter = 1 WHERE name = 'first'")
        .statement("UPDATE counters SET counter = 1 WHERE name = 'second'")
}

pub fn single_object_writer(level: IsolationLevel) -> TxnScript {
    TxnScript::new()
        .isolation(level)
        .statement("UPDATE counters SET counter = 1 WHERE name = 'first'")
}

/// The reader only reads; isolation is fixed when it begins.
pub fn reader_options(level: IsolationLevel) -> TxOptions {
    TxOptions::new(level).read_only()
}

pub async fn run_multi_object_trial(db: &Database, level: IsolationLevel) -> HarnessResult<TrialOutcome> {
    schema::reset_counters(db, &[("first", 0), ("second", 0)]).await?;
    race(db, multi_object_writer(level), level, [READ_FIRST, READ_SECOND], ["first", "second"]).await
}

pub async fn run_single_object_trial(db: &Database, level: IsolationLevel) -> HarnessResult<TrialOutcome> {
    schema::reset_counters(db, &[("first", 0)]).await?;
    race(db, single_object_writer(level), level, [READ_FIRST, READ_FIRST], ["first", "first again"]).await
}

/// Read both statements in one transaction, one round trip each.
pub async fn read_twice(db: &Database, level: IsolationLevel, reads: [&'static str; 2]) -> HarnessResult<(i64, i64)> {
    db.transaction(reader_options(level), |tx| {
        Box::pin(async move {
            let a = tx.query_scalar(reads[0], &[]).await?;
            let b = tx.query_scalar(reads[1], &[]).await?;
            Ok((a, b))
        })
    })
    .await
}

async fn race(
    db: &Database,
    writer: TxnScript,
    level: IsolationLevel,
    reads: [&'static str; 2],
    labels: [&str; 2],
) -> HarnessResult<TrialOutcome> {
    let writer_db = db.clone();
    let reader_db = db.clone();
    let (written, read) = run_pair(
        async move {
            writer_db.run_script(&writer).await?;
            Ok(())
        },
        async move { read_twice(&reader_db, level, reads).await },
    )
    .await;

    let mut conflicts = 0;
    settle(written, &mut conflicts)?;
    let outcome = match settle(read, &mut conflicts)? {
        Some((a, b)) if a != b => TrialOutcome::anomaly(format!(
            "read {} = {}, {} = {}",
            labels[0], a, labels[1], b
        )),
        _ => TrialOutcome::clean(),
    };
    Ok(outcome.with_conflicts(conflicts))
}
