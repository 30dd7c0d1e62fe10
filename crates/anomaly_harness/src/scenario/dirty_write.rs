//! Dirty write: two transactions each set both counters to their own value.
//! With writes properly locked the pair ends equal, whichever commits last.

use anomaly_common::IsolationLevel;
use anomaly_driver::{Database, HarnessResult, TxnScript};

use super::settle;
use crate::runner::{run_concurrently, Body};
use crate::schema;
use crate::trial::TrialOutcome;

pub fn writer(level: IsolationLevel, value: i64) -> TxnScript {
    TxnScript::new()
        .isolation(level)
        .statement(format!("UPDATE counters SET counter = {} WHERE name = 'first'", value))
        .statement(format!("UPDATE counters SET counter = {} WHERE name = 'second'", value))
}

pub async fn run_trial(db: &Database, level: IsolationLevel) -> HarnessResult<TrialOutcome> {
    schema::reset_counters(db, &[("first", 0), ("second", 0)]).await?;

    let bodies: Vec<Body<()>> = [1, 2]
        .into_iter()
        .map(|value| {
            let db = db.clone();
            Box::pin(async move {
                db.run_script(&writer(level, value)).await?;
                Ok(())
            }) as Body<()>
        })
        .collect();

    let mut conflicts = 0;
    for result in run_concurrently(bodies).await {
        settle(result, &mut conflicts)?;
    }

    let first = schema::read_counter(db, "first").await?;
    let second = schema::read_counter(db, "second").await?;
    let outcome = if first != second {
        TrialOutcome::anomaly(format!("first = {}, second = {}", first, second))
    } else {
        TrialOutcome::clean()
    };
    Ok(outcome.with_conflicts(conflicts))
}
