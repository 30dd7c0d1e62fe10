//! Dirty read: a reader must never see a write that is later rolled back.

use anomaly_common::IsolationLevel;
use anomaly_driver::result::scalars;
use anomaly_driver::{Database, HarnessError, HarnessResult, TxnScript};

use super::settle;
use crate::runner::run_pair;
use crate::schema;
use crate::trial::TrialOutcome;

/// Committed value of `first` for the whole trial.
pub const INITIAL: i64 = 10;

/// Increment `first`, then roll back. Runs at the session default level.
pub fn rolled_back_writer() -> TxnScript {
    TxnScript::new()
        .statement("UPDATE counters SET counter = counter + 1 WHERE name = 'first'")
        .rollback()
}

pub fn reader(level: IsolationLevel) -> TxnScript {
    TxnScript::new()
        .isolation(level)
        .statement("SELECT counter FROM counters WHERE name = 'first'")
}

pub async fn run_trial(db: &Database, level: IsolationLevel) -> HarnessResult<TrialOutcome> {
    schema::reset_counters(db, &[("first", INITIAL)]).await?;

    let writer_db = db.clone();
    let reader_db = db.clone();
    let (written, read) = run_pair(
        async move {
            writer_db.run_script(&rolled_back_writer()).await?;
            Ok(())
        },
        async move {
            let sets = reader_db.run_script(&reader(level)).await?;
            scalars(&sets)?
                .first()
                .copied()
                .ok_or_else(|| HarnessError::statement("<dirty read>", "reader returned no value"))
        },
    )
    .await;

    let mut conflicts = 0;
    settle(written, &mut conflicts)?;
    let outcome = match settle(read, &mut conflicts)? {
        Some(seen) if seen != INITIAL => TrialOutcome::anomaly(format!(
            "read uncommitted value {}, committed value is {}",
            seen, INITIAL
        )),
        _ => TrialOutcome::clean(),
    };
    Ok(outcome.with_conflicts(conflicts))
}
