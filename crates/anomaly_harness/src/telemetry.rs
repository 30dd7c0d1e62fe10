//! Trial metrics. Recorded through the `metrics` facade; the binary installs
//! the Prometheus exporter when asked to.

use anomaly_common::{Engine, IsolationLevel};

pub fn record_trial(scenario: &str, engine: Engine, level: IsolationLevel, outcome: &'static str) {
    metrics::counter!(
        "anomaly_trials_total",
        "scenario" => scenario.to_string(),
        "engine" => engine.name(),
        "level" => level.label(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_conflicts(scenario: &str, engine: Engine, level: IsolationLevel, conflicts: u32) {
    if conflicts == 0 {
        return;
    }
    metrics::counter!(
        "anomaly_conflicts_total",
        "scenario" => scenario.to_string(),
        "engine" => engine.name(),
        "level" => level.label()
    )
    .increment(u64::from(conflicts));
}
