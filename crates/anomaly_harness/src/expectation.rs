use std::fmt;

use anomaly_common::{Engine, IsolationLevel};
use serde::Serialize;

use crate::scenario::{Scenario, SkewGuard, UpdateStrategy};

/// Whether an anomaly should ever show up over a run of trials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Expectation {
    /// Zero anomalies in every trial.
    Prevented,
    /// At least one anomaly over the run.
    Reproducible,
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expectation::Prevented => f.write_str("prevented"),
            Expectation::Reproducible => f.write_str("reproducible"),
        }
    }
}

/// Documented behaviour of `engine` running `scenario` at `level`.
///
/// PostgreSQL runs READ UNCOMMITTED as READ COMMITTED. InnoDB's REPEATABLE
/// READ reads from a snapshot but writes the latest version, so it keeps
/// the read-modify-write lost update that PostgreSQL aborts with 40001.
pub fn expected(scenario: Scenario, engine: Engine, level: IsolationLevel) -> Expectation {
    use Expectation::*;
    use IsolationLevel::*;

    match scenario {
        Scenario::DirtyRead => match (engine, level) {
            (Engine::Mysql, ReadUncommitted) => Reproducible,
            _ => Prevented,
        },
        Scenario::DirtyWrite => Prevented,
        Scenario::LostUpdate(UpdateStrategy::ReadModifyWrite) => match (engine, level) {
            (_, ReadUncommitted | ReadCommitted) => Reproducible,
            (Engine::Mysql, RepeatableRead) => Reproducible,
            _ => Prevented,
        },
        Scenario::LostUpdate(_) => Prevented,
        Scenario::ReadSkewMultiObject | Scenario::ReadSkewSingleObject => match level {
            ReadUncommitted | ReadCommitted => Reproducible,
            RepeatableRead | Serializable => Prevented,
        },
        Scenario::WriteSkew(SkewGuard::None) => match level {
            Serializable => Prevented,
            _ => Reproducible,
        },
        Scenario::WriteSkew(SkewGuard::MaterializedLock) => Prevented,
    }
}
