#![allow(dead_code, unused_imports)]

pub use anomaly_common::{Engine, HarnessConfig, IsolationLevel};
pub use anomaly_driver::{Database, HarnessError, Param, TxnScript};
pub use anomaly_harness::schema;
pub use anomaly_harness::scenario::read_skew;
pub use anomaly_harness::{
    expected, Expectation, RetryPolicy, Scenario, SkewGuard, TrialReport, UpdateStrategy,
};

pub fn config() -> HarnessConfig {
    HarnessConfig::from_env().expect("invalid ANOMALY_* environment")
}

/// Connect to `engine` and make sure the tables exist.
pub async fn setup(engine: Engine) -> Database {
    let config = config();
    let db = Database::connect(engine, config.engine(engine))
        .await
        .unwrap_or_else(|e| panic!("cannot reach {}: {}", engine, e));
    schema::ensure_schema(&db).await.expect("schema");
    db
}

pub async fn run(db: &Database, scenario: Scenario, level: IsolationLevel) -> TrialReport {
    let config = config();
    scenario
        .run(db, level, config.trials.count, RetryPolicy::from(&config.retry))
        .await
        .unwrap_or_else(|e| panic!("{} at {} aborted: {}", scenario, level, e))
}

/// Run `scenario` and check the report against the expectations table.
pub async fn assert_expected(db: &Database, scenario: Scenario, level: IsolationLevel) {
    let report = run(db, scenario, level).await;
    if let Err(e) = report.verify(expected(scenario, db.engine(), level)) {
        panic!("{}", e);
    }
}

pub async fn assert_outcome(db: &Database, scenario: Scenario, level: IsolationLevel, want: Expectation) {
    assert_eq!(
        expected(scenario, db.engine(), level),
        want,
        "expectations table disagrees for {} at {}",
        scenario,
        level
    );
    assert_expected(db, scenario, level).await;
}

/// Mitigated increments must all commit: the final value is `initial + 2`
/// in every trial, so neither lost updates nor aborted bodies are allowed.
pub async fn assert_every_increment_commits(db: &Database, strategy: UpdateStrategy, level: IsolationLevel) {
    let scenario = Scenario::LostUpdate(strategy);
    assert_eq!(expected(scenario, db.engine(), level), Expectation::Prevented);
    let report = run(db, scenario, level).await;
    report.verify(Expectation::Prevented).unwrap();
    assert_eq!(
        report.conflicts, 0,
        "{} at {}: bodies aborted, so some trials ended below initial + 2",
        scenario, level
    );
}
