//! Tables the scenarios share, and the per-trial resets.
//!
//! Everything here runs outside the scenario bodies. A failure means the
//! harness cannot establish a known starting state, so errors are promoted
//! to [`HarnessError::Setup`](anomaly_driver::HarnessError::Setup).

use anomaly_driver::script::quote_literal;
use anomaly_driver::{Database, HarnessResult, Param};
use tracing::info;

/// VARCHAR keys: InnoDB cannot index an unbounded TEXT primary key.
pub const CREATE_COUNTERS: &str =
    "CREATE TABLE IF NOT EXISTS counters (name VARCHAR(64) PRIMARY KEY, counter INTEGER NOT NULL)";
pub const CREATE_MATERIALIZED_LOCKS: &str =
    "CREATE TABLE IF NOT EXISTS materialized_locks (name VARCHAR(64) PRIMARY KEY)";

/// Sentinel row standing for "the set of counters".
pub const COUNTERS_LOCK: &str = "counters";

pub async fn ensure_schema(db: &Database) -> HarnessResult<()> {
    for ddl in [CREATE_COUNTERS, CREATE_MATERIALIZED_LOCKS] {
        db.execute_batch(ddl)
            .await
            .map_err(|e| e.into_setup("create schema"))?;
    }
    info!("Schema ready on {}", db.engine());
    Ok(())
}

/// Replace the contents of `counters` with exactly `rows`.
pub async fn reset_counters(db: &Database, rows: &[(&str, i64)]) -> HarnessResult<()> {
    let mut script = String::from("TRUNCATE TABLE counters");
    if !rows.is_empty() {
        let values: Vec<String> = rows
            .iter()
            .map(|(name, value)| format!("({}, {})", quote_literal(name), value))
            .collect();
        script.push_str(";\nINSERT INTO counters (name, counter) VALUES ");
        script.push_str(&values.join(", "));
    }
    db.execute_batch(&script)
        .await
        .map_err(|e| e.into_setup("reset counters"))?;
    Ok(())
}

/// Leave a single unlocked sentinel row in `materialized_locks`.
pub async fn reset_locks(db: &Database) -> HarnessResult<()> {
    db.execute("DELETE FROM materialized_locks", &[])
        .await
        .map_err(|e| e.into_setup("reset materialized locks"))?;
    db.execute(
        "INSERT INTO materialized_locks (name) VALUES ($1)",
        &[Param::from(COUNTERS_LOCK)],
    )
    .await
    .map_err(|e| e.into_setup("reset materialized locks"))?;
    Ok(())
}

pub async fn read_counter(db: &Database, name: &str) -> HarnessResult<i64> {
    db.query_scalar(
        "SELECT counter FROM counters WHERE name = $1",
        &[Param::from(name)],
    )
    .await
}

pub async fn count_counters(db: &Database) -> HarnessResult<i64> {
    db.query_scalar("SELECT COUNT(*) FROM counters", &[]).await
}
