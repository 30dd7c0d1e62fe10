use anomaly_harness::{Expectation, TrialReport};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    AsExpected,
    Unexpected,
}

/// One report plus how it compares with the expectations table.
#[derive(Debug, Clone, Serialize)]
pub struct ReportRow {
    #[serde(flatten)]
    pub report: TrialReport,
    pub expected: Expectation,
    pub verdict: Verdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ReportRow {
    pub fn new(report: TrialReport, expected: Expectation) -> Self {
        let detail = report.verify(expected).err().map(|e| e.to_string());
        let verdict = if detail.is_none() {
            Verdict::AsExpected
        } else {
            Verdict::Unexpected
        };
        Self {
            report,
            expected,
            verdict,
            detail,
        }
    }

    pub fn conforms(&self) -> bool {
        self.verdict == Verdict::AsExpected
    }

    pub fn line(&self) -> String {
        let r = &self.report;
        format!(
            "{:<24} {:<18} {:>7} {:>9} {:>9} {:>6}  {:<12} {}",
            r.scenario,
            r.level.label(),
            r.trials,
            r.anomalies,
            r.conflicts,
            r.errors,
            self.expected.to_string(),
            match self.verdict {
                Verdict::AsExpected => "ok",
                Verdict::Unexpected => "UNEXPECTED",
            }
        )
    }
}

pub fn header() -> String {
    format!(
        "{:<24} {:<18} {:>7} {:>9} {:>9} {:>6}  {:<12} {}",
        "scenario", "level", "trials", "anomalies", "conflicts", "errors", "expected", "verdict"
    )
}
