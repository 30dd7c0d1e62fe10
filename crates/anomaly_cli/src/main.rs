mod args;
mod report;

use std::net::SocketAddr;
use std::process;

use anomaly_common::HarnessConfig;
use anomaly_driver::Database;
use anomaly_harness::{expected, schema, RetryPolicy};
use anyhow::{Context, Result};
use args::Args;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use report::ReportRow;
use tracing::info;

/// Exit status when a report contradicts the expectations table.
const EXIT_UNEXPECTED: i32 = 1;
/// Exit status when the run could not complete.
const EXIT_FATAL: i32 = 2;

#[tokio::main]
async fn main() {
    match run().await {
        Ok(true) => {}
        Ok(false) => process::exit(EXIT_UNEXPECTED),
        Err(e) => {
            eprintln!("anomaly: error: {:#}", e);
            process::exit(EXIT_FATAL);
        }
    }
}

/// Returns whether every report matched its expectation.
async fn run() -> Result<bool> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if args.print_default_config {
        print!("{}", HarnessConfig::default().to_toml()?);
        return Ok(true);
    }

    if let Some(addr) = args.metrics_addr {
        init_metrics(addr)?;
    }

    let mut config = HarnessConfig::load(&args.config)?;
    config.apply_env()?;
    if let Some(trials) = args.trials {
        config.trials.count = trials;
    }
    config.validate()?;

    let scenarios = args.scenarios()?;
    let levels = args.levels()?;

    let db = Database::connect(args.engine, config.engine(args.engine))
        .await
        .with_context(|| format!("Could not connect to {}", args.engine))?;
    if args.provision {
        schema::ensure_schema(&db)
            .await
            .context("Could not create the counters tables")?;
    }

    let retry = RetryPolicy::from(&config.retry);
    info!(
        "Running {} scenario(s) x {} level(s), {} trials each, on {}",
        scenarios.len(),
        levels.len(),
        config.trials.count,
        args.engine
    );

    if !args.json {
        println!("{}", report::header());
    }
    let mut rows = Vec::with_capacity(scenarios.len() * levels.len());
    for scenario in &scenarios {
        for &level in &levels {
            let report = scenario
                .run(&db, level, config.trials.count, retry)
                .await
                .with_context(|| format!("{} at {} aborted", scenario, level))?;
            let row = ReportRow::new(report, expected(*scenario, args.engine, level));
            if !args.json {
                println!("{}", row.line());
            }
            rows.push(row);
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        for row in rows.iter().filter(|r| !r.conforms()) {
            if let Some(detail) = &row.detail {
                eprintln!("{}", detail);
            }
        }
    }

    db.close().await;
    Ok(rows.iter().all(ReportRow::conforms))
}

/// Serve the trial counters on `http://{addr}/metrics`.
fn init_metrics(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .with_context(|| format!("Could not start the metrics endpoint on {}", addr))?;
    info!("Prometheus metrics endpoint on http://{}/metrics", addr);
    Ok(())
}
