//! Anomaly scenarios.
//!
//! Every trial follows the same shape: reset state, run two bodies
//! concurrently against one engine at one level, join, then inspect the
//! final state. A body the engine aborts with a serialization conflict is
//! counted, not treated as a failure; it simply contributes nothing to the
//! final state.

pub mod dirty_read;
pub mod dirty_write;
pub mod lost_update;
pub mod read_skew;
pub mod write_skew;

use std::fmt;
use std::str::FromStr;

use anomaly_common::IsolationLevel;
use anomaly_driver::{Database, HarnessError, HarnessResult};
use tracing::debug;

use crate::retry::RetryPolicy;
use crate::trial::{run_trials, TrialLabel, TrialOutcome, TrialReport};

/// How a lost-update body increments the counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateStrategy {
    /// Read the value, add one in the client, write it back.
    ReadModifyWrite,
    /// `SET counter = counter + 1`.
    AtomicIncrement,
    /// Read with `FOR UPDATE`, then write.
    SelectForUpdate,
    /// Write only if the value is still the one read; retry otherwise.
    CompareAndSet,
}

impl UpdateStrategy {
    pub const ALL: [UpdateStrategy; 4] = [
        UpdateStrategy::ReadModifyWrite,
        UpdateStrategy::AtomicIncrement,
        UpdateStrategy::SelectForUpdate,
        UpdateStrategy::CompareAndSet,
    ];
}

/// Extra locking in front of the write-skew check-then-insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkewGuard {
    None,
    /// Lock a sentinel row standing for the whole `counters` set.
    MaterializedLock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scenario {
    DirtyRead,
    DirtyWrite,
    LostUpdate(UpdateStrategy),
    ReadSkewMultiObject,
    ReadSkewSingleObject,
    WriteSkew(SkewGuard),
}

impl Scenario {
    pub fn all() -> Vec<Scenario> {
        let mut all = vec![Scenario::DirtyRead, Scenario::DirtyWrite];
        all.extend(UpdateStrategy::ALL.into_iter().map(Scenario::LostUpdate));
        all.extend([
            Scenario::ReadSkewMultiObject,
            Scenario::ReadSkewSingleObject,
            Scenario::WriteSkew(SkewGuard::None),
            Scenario::WriteSkew(SkewGuard::MaterializedLock),
        ]);
        all
    }

    pub fn name(self) -> &'static str {
        match self {
            Scenario::DirtyRead => "dirty-read",
            Scenario::DirtyWrite => "dirty-write",
            Scenario::LostUpdate(UpdateStrategy::ReadModifyWrite) => "lost-update:rmw",
            Scenario::LostUpdate(UpdateStrategy::AtomicIncrement) => "lost-update:atomic",
            Scenario::LostUpdate(UpdateStrategy::SelectForUpdate) => "lost-update:for-update",
            Scenario::LostUpdate(UpdateStrategy::CompareAndSet) => "lost-update:cas",
            Scenario::ReadSkewMultiObject => "read-skew:multi",
            Scenario::ReadSkewSingleObject => "read-skew:single",
            Scenario::WriteSkew(SkewGuard::None) => "write-skew",
            Scenario::WriteSkew(SkewGuard::MaterializedLock) => "write-skew:locked",
        }
    }

    /// One reset → race → inspect cycle.
    pub async fn run_trial(
        self,
        db: &Database,
        level: IsolationLevel,
        retry: RetryPolicy,
    ) -> HarnessResult<TrialOutcome> {
        match self {
            Scenario::DirtyRead => dirty_read::run_trial(db, level).await,
            Scenario::DirtyWrite => dirty_write::run_trial(db, level).await,
            Scenario::LostUpdate(strategy) => lost_update::run_trial(db, level, strategy, retry).await,
            Scenario::ReadSkewMultiObject => read_skew::run_multi_object_trial(db, level).await,
            Scenario::ReadSkewSingleObject => read_skew::run_single_object_trial(db, level).await,
            Scenario::WriteSkew(guard) => write_skew::run_trial(db, level, guard).await,
        }
    }

    /// `count` trials folded into a report.
    pub async fn run(
        self,
        db: &Database,
        level: IsolationLevel,
        count: u32,
        retry: RetryPolicy,
    ) -> HarnessResult<TrialReport> {
        let label = TrialLabel::new(self.name(), db.engine(), level);
        run_trials(label, count, |_| self.run_trial(db, level, retry)).await
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scenario {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        // `lost-update` alone means the naive strategy.
        if wanted == "lost-update" {
            return Ok(Scenario::LostUpdate(UpdateStrategy::ReadModifyWrite));
        }
        Scenario::all()
            .into_iter()
            .find(|scenario| scenario.name() == wanted)
            .ok_or_else(|| {
                let known: Vec<&str> = Scenario::all().into_iter().map(Scenario::name).collect();
                HarnessError::Config(format!(
                    "unknown scenario '{}': expected one of {}",
                    s.trim(),
                    known.join(", ")
                ))
            })
    }
}

/// Fold one body's result into the trial: a serialization conflict becomes
/// `None` and bumps `conflicts`; any other error fails the trial.
pub(crate) fn settle<T>(result: HarnessResult<T>, conflicts: &mut u32) -> HarnessResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_serialization_conflict() => {
            debug!("Body aborted by engine: {}", e);
            *conflicts += 1;
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
