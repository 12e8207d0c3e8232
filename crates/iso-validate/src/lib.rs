#![forbid(unsafe_code)]

mod additional_data;
mod compare;
mod dispatch;
mod layout;

use std::collections::BTreeMap;
use std::string::FromUtf8Error;

use csv::WriterBuilder;
use iso_types::FieldId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use compare::{CompareContext, ComparatorError, Verdict, parse_tlv};
pub use dispatch::{NO_CATALOG_ENTRY, RuleDispatcher};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldStatus {
    Passed,
    Failed,
    Skipped,
}

impl FieldStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

/// `detail` is the actual value on pass, the mismatch text on failure and the
/// reason on skip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldOutcome {
    pub status: FieldStatus,
    pub expected: String,
    pub detail: String,
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Utf8(#[from] FromUtf8Error),
}

/// Per-message outcome table, one entry per DE. Later writes replace earlier
/// ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    row_id: String,
    entries: BTreeMap<FieldId, FieldOutcome>,
}

impl ValidationResult {
    #[must_use]
    pub fn new(row_id: impl Into<String>) -> Self {
        Self {
            row_id: row_id.into(),
            entries: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn row_id(&self) -> &str {
        &self.row_id
    }

    pub fn record(&mut self, field: FieldId, outcome: FieldOutcome) {
        self.entries.insert(field, outcome);
    }

    #[must_use]
    pub fn get(&self, field: FieldId) -> Option<&FieldOutcome> {
        self.entries.get(&field)
    }

    /// Entries in numeric DE order, MTI first.
    pub fn entries(&self) -> impl Iterator<Item = (FieldId, &FieldOutcome)> {
        self.entries.iter().map(|(field, outcome)| (*field, outcome))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn count(&self, status: FieldStatus) -> usize {
        self.entries
            .values()
            .filter(|outcome| outcome.status == status)
            .count()
    }

    #[must_use]
    pub fn passed(&self) -> usize {
        self.count(FieldStatus::Passed)
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(FieldStatus::Failed)
    }

    #[must_use]
    pub fn skipped(&self) -> usize {
        self.count(FieldStatus::Skipped)
    }

    /// No DE failed. Skips do not count against a row.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    #[must_use]
    pub fn summary(&self) -> RowSummary {
        RowSummary::from(self)
    }

    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "Row {} passed={} failed={} skipped={}\n",
            self.row_id,
            self.passed(),
            self.failed(),
            self.skipped()
        ));
        out.push_str(&format!(
            "{:<6} {:<8} {:<24} {}\n",
            "DE", "STATUS", "EXPECTED", "DETAIL"
        ));
        for (field, outcome) in self.entries() {
            out.push_str(&format!(
                "{:<6} {:<8} {:<24} {}\n",
                field.label(),
                outcome.status.as_str(),
                outcome.expected,
                outcome.detail
            ));
        }
        out
    }

    /// Outcome table as CSV: `de,status,expected,detail`.
    pub fn write_csv_string(&self) -> Result<String, ReportError> {
        let mut writer = WriterBuilder::new().from_writer(Vec::new());
        writer.write_record(["de", "status", "expected", "detail"])?;
        for (field, outcome) in self.entries() {
            writer.write_record([
                field.label().as_str(),
                outcome.status.as_str(),
                outcome.expected.as_str(),
                outcome.detail.as_str(),
            ])?;
        }
        let bytes = writer.into_inner().map_err(|err| err.into_error())?;
        Ok(String::from_utf8(bytes)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowSummary {
    pub row_id: String,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub failures: BTreeMap<FieldId, String>,
}

impl From<&ValidationResult> for RowSummary {
    fn from(result: &ValidationResult) -> Self {
        Self {
            row_id: result.row_id.clone(),
            total: result.len(),
            passed: result.passed(),
            failed: result.failed(),
            skipped: result.skipped(),
            failures: result
                .entries()
                .filter(|(_, outcome)| outcome.status == FieldStatus::Failed)
                .map(|(field, outcome)| (field, outcome.detail.clone()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldAggregate {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub failure_reasons: BTreeMap<String, usize>,
}

impl FieldAggregate {
    #[must_use]
    pub fn evaluated(&self) -> usize {
        self.passed + self.failed
    }

    /// Share of evaluated (non-skipped) outcomes that passed, in percent.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        percent(self.passed, self.evaluated())
    }

    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        percent(self.failed, self.evaluated())
    }
}

/// Roll-up over many rows. Pure arithmetic over recorded outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedResults {
    pub rows: usize,
    pub rows_passed: usize,
    pub rows_failed: usize,
    pub fields: BTreeMap<FieldId, FieldAggregate>,
}

impl AggregatedResults {
    #[must_use]
    pub fn from_results<'r>(results: impl IntoIterator<Item = &'r ValidationResult>) -> Self {
        let mut aggregated = Self::default();
        for result in results {
            aggregated.merge(result);
        }
        aggregated
    }

    pub fn merge(&mut self, result: &ValidationResult) {
        self.rows += 1;
        if result.is_success() {
            self.rows_passed += 1;
        } else {
            self.rows_failed += 1;
        }
        for (field, outcome) in result.entries() {
            let aggregate = self.fields.entry(field).or_default();
            match outcome.status {
                FieldStatus::Passed => aggregate.passed += 1,
                FieldStatus::Skipped => aggregate.skipped += 1,
                FieldStatus::Failed => {
                    aggregate.failed += 1;
                    *aggregate
                        .failure_reasons
                        .entry(outcome.detail.clone())
                        .or_default() += 1;
                }
            }
        }
    }

    /// DEs with at least one failure, worst failure rate first; ties by DE.
    #[must_use]
    pub fn failure_ranking(&self) -> Vec<(FieldId, &FieldAggregate)> {
        let mut ranked = self
            .fields
            .iter()
            .filter(|(_, aggregate)| aggregate.failed > 0)
            .map(|(field, aggregate)| (*field, aggregate))
            .collect::<Vec<_>>();
        ranked.sort_by(|(left_field, left), (right_field, right)| {
            right
                .failure_rate()
                .total_cmp(&left.failure_rate())
                .then_with(|| left_field.cmp(right_field))
        });
        ranked
    }

    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "Rows total={} passed={} failed={}\n",
            self.rows, self.rows_passed, self.rows_failed
        ));
        for (field, aggregate) in &self.fields {
            out.push_str(&format!(
                "- {} pass={} fail={} skip={} success_rate={:.1}%\n",
                field.label(),
                aggregate.passed,
                aggregate.failed,
                aggregate.skipped,
                aggregate.success_rate(),
            ));
            for (reason, count) in &aggregate.failure_reasons {
                out.push_str(&format!("    {count}x {reason}\n"));
            }
        }
        out
    }
}

fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        (part as f64 / total as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use iso_types::FieldId;

    use super::{AggregatedResults, FieldOutcome, FieldStatus, ValidationResult};

    fn de(number: u32) -> FieldId {
        FieldId::new(number).expect("field id")
    }

    fn outcome(status: FieldStatus, detail: &str) -> FieldOutcome {
        FieldOutcome {
            status,
            expected: "x".to_owned(),
            detail: detail.to_owned(),
        }
    }

    fn row(id: &str, entries: &[(u32, FieldStatus, &str)]) -> ValidationResult {
        let mut result = ValidationResult::new(id);
        for (number, status, detail) in entries {
            result.record(de(*number), outcome(*status, detail));
        }
        result
    }

    #[test]
    fn later_writes_replace_earlier_outcomes() {
        let mut result = ValidationResult::new("r1");
        result.record(de(12), outcome(FieldStatus::Failed, "first"));
        result.record(de(12), outcome(FieldStatus::Passed, "second"));
        assert_eq!(result.len(), 1);
        assert_eq!(result.get(de(12)).expect("de12").detail, "second");
        assert!(result.is_success());
    }

    #[test]
    fn summary_lists_only_failures() {
        let result = row(
            "r1",
            &[
                (0, FieldStatus::Skipped, "Field is not canonicalized"),
                (4, FieldStatus::Failed, "amount mismatch"),
                (2, FieldStatus::Passed, "4111"),
            ],
        );
        let summary = result.summary();
        assert_eq!((summary.total, summary.passed, summary.failed, summary.skipped), (3, 1, 1, 1));
        assert_eq!(summary.failures.get(&de(4)).map(String::as_str), Some("amount mismatch"));
        assert!(!result.is_success());
    }

    #[test]
    fn plain_and_csv_output_are_sorted_mti_first() {
        let result = row(
            "r1",
            &[
                (70, FieldStatus::Passed, "301"),
                (0, FieldStatus::Passed, "0100"),
                (4, FieldStatus::Failed, "a, \"quoted\" detail"),
            ],
        );
        let plain = result.render_plain();
        let mti = plain.find("MTI").expect("mti row");
        let de4 = plain.find("DE4 ").expect("de4 row");
        let de70 = plain.find("DE70").expect("de70 row");
        assert!(mti < de4 && de4 < de70);

        let csv = result.write_csv_string().expect("csv");
        let lines = csv.lines().collect::<Vec<_>>();
        assert_eq!(lines[0], "de,status,expected,detail");
        assert_eq!(lines[1], "MTI,passed,x,0100");
        assert_eq!(lines[2], "DE4,failed,x,\"a, \"\"quoted\"\" detail\"");
    }

    #[test]
    fn aggregation_ranks_fields_by_failure_rate() {
        let results = [
            row("r1", &[(2, FieldStatus::Passed, ""), (4, FieldStatus::Failed, "missing")]),
            row("r2", &[(2, FieldStatus::Failed, "len"), (4, FieldStatus::Failed, "missing")]),
            row("r3", &[(2, FieldStatus::Passed, ""), (4, FieldStatus::Skipped, "skip")]),
        ];
        let aggregated = AggregatedResults::from_results(&results);
        assert_eq!(aggregated.rows, 3);
        assert_eq!(aggregated.rows_passed, 1);
        assert_eq!(aggregated.rows_failed, 2);

        let de4 = aggregated.fields.get(&de(4)).expect("de4");
        assert_eq!(de4.failure_reasons.get("missing"), Some(&2));
        assert!((de4.failure_rate() - 100.0).abs() < f64::EPSILON);

        let ranking = aggregated.failure_ranking();
        assert_eq!(ranking.iter().map(|(field, _)| *field).collect::<Vec<_>>(), vec![de(4), de(2)]);
        assert!(aggregated.render_plain().contains("1x len"));
    }
}
