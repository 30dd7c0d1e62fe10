//! Repeated-trial wrapper.
//!
//! Anomalies are races, so a scenario is run many times and the outcomes are
//! aggregated. Errors are split by [`ErrorKind`](anomaly_common::ErrorKind):
//! fatal errors stop the run, anything else fails only its trial.

use std::future::Future;

use anomaly_common::{Engine, IsolationLevel};
use anomaly_driver::{HarnessError, HarnessResult};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::expectation::Expectation;
use crate::telemetry;

/// What a single trial observed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrialOutcome {
    /// Description of the anomaly, if the final state showed one.
    pub anomaly: Option<String>,
    /// Bodies the engine aborted with a serialization conflict.
    pub conflicts: u32,
}

impl TrialOutcome {
    pub fn clean() -> Self {
        Self::default()
    }

    pub fn anomaly(detail: impl Into<String>) -> Self {
        Self {
            anomaly: Some(detail.into()),
            conflicts: 0,
        }
    }

    pub fn with_conflicts(mut self, conflicts: u32) -> Self {
        self.conflicts = conflicts;
        self
    }

    pub fn is_anomaly(&self) -> bool {
        self.anomaly.is_some()
    }
}

/// Identifies one run: scenario name, engine and level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialLabel {
    pub scenario: String,
    pub engine: Engine,
    pub level: IsolationLevel,
}

impl TrialLabel {
    pub fn new(scenario: impl Into<String>, engine: Engine, level: IsolationLevel) -> Self {
        Self {
            scenario: scenario.into(),
            engine,
            level,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrialReport {
    pub scenario: String,
    pub engine: Engine,
    pub level: IsolationLevel,
    pub trials: u32,
    pub anomalies: u32,
    pub conflicts: u32,
    pub errors: u32,
    pub first_anomaly: Option<String>,
    pub first_error: Option<String>,
}

impl TrialReport {
    pub fn new(label: &TrialLabel) -> Self {
        Self {
            scenario: label.scenario.clone(),
            engine: label.engine,
            level: label.level,
            trials: 0,
            anomalies: 0,
            conflicts: 0,
            errors: 0,
            first_anomaly: None,
            first_error: None,
        }
    }

    fn record(&mut self, trial: u32, outcome: TrialOutcome) {
        self.trials += 1;
        self.conflicts += outcome.conflicts;
        if let Some(detail) = outcome.anomaly {
            self.anomalies += 1;
            if self.first_anomaly.is_none() {
                self.first_anomaly = Some(format!("trial {}: {}", trial, detail));
            }
        }
    }

    fn record_error(&mut self, trial: u32, err: &HarnessError) {
        self.trials += 1;
        self.errors += 1;
        if self.first_error.is_none() {
            self.first_error = Some(format!("trial {}: {}", trial, err));
        }
    }

    pub fn title(&self) -> String {
        format!("{} on {} at {}", self.scenario, self.engine, self.level)
    }

    pub fn verify(&self, expectation: Expectation) -> HarnessResult<()> {
        let fail = |detail: String| HarnessError::ExpectationFailed {
            scenario: self.title(),
            detail,
        };

        if self.errors > 0 {
            return Err(fail(format!(
                "{} of {} trials errored; first: {}",
                self.errors,
                self.trials,
                self.first_error.as_deref().unwrap_or("-")
            )));
        }
        match expectation {
            Expectation::Prevented if self.anomalies > 0 => Err(fail(format!(
                "expected prevented, observed {} anomalies in {} trials; first: {}",
                self.anomalies,
                self.trials,
                self.first_anomaly.as_deref().unwrap_or("-")
            ))),
            Expectation::Reproducible if self.anomalies == 0 => Err(fail(format!(
                "expected reproducible, observed no anomaly in {} trials",
                self.trials
            ))),
            _ => Ok(()),
        }
    }
}

/// Run `trial(i)` for `i` in `1..=count`, one after another.
pub async fn run_trials<F, Fut>(label: TrialLabel, count: u32, mut trial: F) -> HarnessResult<TrialReport>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = HarnessResult<TrialOutcome>>,
{
    let mut report = TrialReport::new(&label);

    for i in 1..=count {
        match trial(i).await {
            Ok(outcome) => {
                let kind = if outcome.is_anomaly() { "anomaly" } else { "clean" };
                debug!(
                    "{} trial {}: {} (conflicts: {})",
                    label.scenario, i, kind, outcome.conflicts
                );
                telemetry::record_trial(&label.scenario, label.engine, label.level, kind);
                telemetry::record_conflicts(&label.scenario, label.engine, label.level, outcome.conflicts);
                report.record(i, outcome);
            }
            Err(e) if e.is_fatal() => {
                warn!("{} aborted at trial {}: {}", report.title(), i, e);
                return Err(e);
            }
            Err(e) => {
                debug!("{} trial {} errored: {}", label.scenario, i, e);
                telemetry::record_trial(&label.scenario, label.engine, label.level, "error");
                report.record_error(i, &e);
            }
        }
    }

    info!(
        "{}: {} trials, {} anomalies, {} conflicts, {} errors",
        report.title(),
        report.trials,
        report.anomalies,
        report.conflicts,
        report.errors
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label() -> TrialLabel {
        TrialLabel::new("lost-update:rmw", Engine::Postgres, IsolationLevel::ReadCommitted)
    }

    #[tokio::test]
    async fn test_counts_anomalies_and_conflicts() {
        let report = run_trials(label(), 10, |i| async move {
            if i % 3 == 0 {
                Ok(TrialOutcome::anomaly("final counter 1, expected 2"))
            } else {
                Ok(TrialOutcome::clean().with_conflicts(1))
            }
        })
        .await
        .unwrap();

        assert_eq!(report.trials, 10);
        assert_eq!(report.anomalies, 3);
        assert_eq!(report.conflicts, 7);
        assert_eq!(report.errors, 0);
        assert_eq!(
            report.first_anomaly.as_deref(),
            Some("trial 3: final counter 1, expected 2")
        );
    }

    #[tokio::test]
    async fn test_fatal_error_aborts_run() {
        let mut ran = 0;
        let err = run_trials(label(), 100, |i| {
            ran += 1;
            async move {
                if i == 4 {
                    Err(HarnessError::Setup("TRUNCATE counters: relation does not exist".into()))
                } else {
                    Ok(TrialOutcome::clean())
                }
            }
        })
        .await
        .unwrap_err();

        assert!(err.is_fatal());
        assert_eq!(ran, 4);
    }

    #[tokio::test]
    async fn test_trial_error_counted_and_run_continues() {
        let report = run_trials(label(), 5, |i| async move {
            if i == 2 {
                Err(HarnessError::statement("INSERT", "duplicate key value"))
            } else {
                Ok(TrialOutcome::clean())
            }
        })
        .await
        .unwrap();

        assert_eq!(report.trials, 5);
        assert_eq!(report.errors, 1);
        assert!(report.first_error.as_deref().unwrap().starts_with("trial 2:"));
        assert!(report.verify(Expectation::Prevented).is_err());
    }

    #[test]
    fn test_verify_prevented() {
        let mut report = TrialReport::new(&label());
        report.record(1, TrialOutcome::clean());
        assert!(report.verify(Expectation::Prevented).is_ok());
        assert!(report.verify(Expectation::Reproducible).is_err());

        report.record(2, TrialOutcome::anomaly("read 11"));
        let err = report.verify(Expectation::Prevented).unwrap_err();
        assert!(err.to_string().contains("expected prevented"));
        assert!(report.verify(Expectation::Reproducible).is_ok());
    }

    #[test]
    fn test_report_serializes() {
        let mut report = TrialReport::new(&label());
        report.record(1, TrialOutcome::anomaly("final counter 1"));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["engine"], "postgres");
        assert_eq!(json["level"], "read-committed");
        assert_eq!(json["anomalies"], 1);
    }
}
