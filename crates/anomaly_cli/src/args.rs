use std::net::SocketAddr;
use std::path::PathBuf;

use anomaly_common::{Engine, HarnessResult, IsolationLevel};
use anomaly_harness::Scenario;
use clap::Parser;

/// Race concurrent transactions against PostgreSQL or MySQL and report
/// which isolation anomalies show up at each level.
#[derive(Debug, Parser)]
#[command(name = "anomaly", version)]
pub struct Args {
    /// Configuration file (TOML). A missing file means built-in defaults.
    #[arg(short = 'c', long, env = "ANOMALY_CONFIG", default_value = "anomaly.toml")]
    pub config: PathBuf,

    /// Engine to test: postgres or mysql
    #[arg(short = 'e', long, default_value = "postgres")]
    pub engine: Engine,

    /// Comma-separated scenario names, or `all`
    #[arg(short = 's', long, default_value = "all")]
    pub scenario: String,

    /// Comma-separated isolation levels (ru, rc, rr, s or full names), or `all`
    #[arg(short = 'l', long, default_value = "all")]
    pub level: String,

    /// Trials per scenario and level (overrides config and ANOMALY_TRIALS)
    #[arg(short = 'n', long)]
    pub trials: Option<u32>,

    /// Create the tables before running
    #[arg(long)]
    pub provision: bool,

    /// Print reports as a JSON array instead of a table
    #[arg(long)]
    pub json: bool,

    /// Serve Prometheus metrics on this address while the run lasts
    #[arg(long, env = "ANOMALY_METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,

    /// Print the default configuration as TOML and exit
    #[arg(long)]
    pub print_default_config: bool,
}

impl Args {
    pub fn scenarios(&self) -> HarnessResult<Vec<Scenario>> {
        if self.scenario.trim().eq_ignore_ascii_case("all") {
            return Ok(Scenario::all());
        }
        split(&self.scenario).map(str::parse).collect()
    }

    pub fn levels(&self) -> HarnessResult<Vec<IsolationLevel>> {
        if self.level.trim().eq_ignore_ascii_case("all") {
            return Ok(IsolationLevel::ALL.to_vec());
        }
        split(&self.level).map(str::parse).collect()
    }
}

fn split(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anomaly_harness::{SkewGuard, UpdateStrategy};

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("anomaly").chain(argv.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults_select_everything() {
        let args = parse(&[]);
        assert_eq!(args.engine, Engine::Postgres);
        assert_eq!(args.scenarios().unwrap().len(), Scenario::all().len());
        assert_eq!(args.levels().unwrap(), IsolationLevel::ALL.to_vec());
        assert!(!args.json);
        assert!(args.trials.is_none());
        assert!(args.metrics_addr.is_none());
    }

    #[test]
    fn test_explicit_selection() {
        let args = parse(&[
            "--engine",
            "mysql",
            "--scenario",
            "lost-update:cas, write-skew:locked",
            "--level",
            "rc,serializable",
            "--trials",
            "50",
            "--json",
            "--metrics-addr",
            "127.0.0.1:9464",
        ]);
        assert_eq!(args.engine, Engine::Mysql);
        assert_eq!(
            args.scenarios().unwrap(),
            vec![
                Scenario::LostUpdate(UpdateStrategy::CompareAndSet),
                Scenario::WriteSkew(SkewGuard::MaterializedLock),
            ]
        );
        assert_eq!(
            args.levels().unwrap(),
            vec![IsolationLevel::ReadCommitted, IsolationLevel::Serializable]
        );
        assert_eq!(args.trials, Some(50));
        assert!(args.json);
        assert_eq!(args.metrics_addr, Some("127.0.0.1:9464".parse().unwrap()));
    }

    #[test]
    fn test_unknown_values_rejected() {
        assert!(Args::try_parse_from(["anomaly", "--engine", "oracle"]).is_err());
        assert!(parse(&["--scenario", "phantom"]).scenarios().is_err());
        assert!(parse(&["--level", "snapshot"]).levels().is_err());
        assert!(Args::try_parse_from(["anomaly", "--metrics-addr", "localhost"]).is_err());
    }
}
