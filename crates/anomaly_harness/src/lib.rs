//! Isolation anomaly harness.
//!
//! A scenario resets shared state, races two transaction bodies against one
//! engine at one isolation level, then inspects the final state for the
//! anomaly it targets. [`trial::run_trials`] repeats a scenario and folds the
//! outcomes into a [`TrialReport`]; [`expectation::expected`] says whether
//! the anomaly should show up at all for that engine and level.

pub mod expectation;
pub mod retry;
pub mod runner;
pub mod scenario;
pub mod schema;
pub mod telemetry;
pub mod trial;

pub use expectation::{expected, Expectation};
pub use retry::{retry_until, Attempt, RetryPolicy};
pub use runner::{run_concurrently, run_pair, Body};
pub use scenario::{Scenario, SkewGuard, UpdateStrategy};
pub use trial::{run_trials, TrialLabel, TrialOutcome, TrialReport};
