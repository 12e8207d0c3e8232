#![forbid(unsafe_code)]

mod data;
mod oracle;

use std::fs;
use std::path::{Path, PathBuf};

use csv::WriterBuilder;
use iso_catalog::{CatalogError, FieldCatalog};
use iso_codec::{FormatWarning, IsoMessage, MessageBuilder};
use iso_validate::{AggregatedResults, ReportError, RowSummary, RuleDispatcher, ValidationResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{error, info, warn};

pub use data::{TestDataEntry, TestRow, load_rows, read_rows_csv_str, read_rows_json_str};
pub use oracle::{
    CanonicalOracle, CommandOracle, HttpOracle, OracleRequest, RecordedOracle, TransportError,
    error_message,
};

pub const DEFAULT_SEED: u64 = 8583;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OracleMode {
    /// Canonical JSON recorded in the row fixtures.
    Recorded,
    Http,
    Command,
}

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub fixture_root: PathBuf,
    pub catalog_path: PathBuf,
    pub rows_path: PathBuf,
    pub artifact_root: PathBuf,
    pub oracle_mode: OracleMode,
    pub endpoint: Option<String>,
    pub command: Option<String>,
    pub seed: u64,
    /// Overrides the calendar year used to complete `MMDD` dates.
    pub reference_year: Option<i32>,
}

impl HarnessConfig {
    #[must_use]
    pub fn default_paths() -> Self {
        let crate_root = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        let fixture_root = crate_root.join("fixtures");
        Self {
            catalog_path: fixture_root.join("catalog.json"),
            rows_path: fixture_root.join("rows"),
            artifact_root: crate_root.join("../../artifacts/conformance"),
            oracle_mode: OracleMode::Recorded,
            endpoint: None,
            command: None,
            seed: DEFAULT_SEED,
            reference_year: None,
            fixture_root,
        }
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::default_paths()
    }
}

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Report(#[from] ReportError),
    #[error("fixture format error: {0}")]
    FixtureFormat(String),
    #[error("{failed_rows} of {rows} rows failed validation")]
    GateFailed { rows: usize, failed_rows: usize },
}

/// Everything produced for one test-data row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowReport {
    pub row_id: String,
    pub wire: String,
    pub wire_sha256: String,
    pub debug_view: Value,
    pub warnings: Vec<FormatWarning>,
    pub result: ValidationResult,
    pub summary: RowSummary,
}

/// A row that never reached validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowFailure {
    pub row_id: String,
    pub wire: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteReport {
    pub oracle: String,
    pub seed: u64,
    pub rows: Vec<RowReport>,
    pub transport_failures: Vec<RowFailure>,
    pub aggregated: AggregatedResults,
    pub report_hash: String,
}

impl SuiteReport {
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len() + self.transport_failures.len()
    }

    #[must_use]
    pub fn failed_rows(&self) -> usize {
        self.aggregated.rows_failed + self.transport_failures.len()
    }

    #[must_use]
    pub fn is_green(&self) -> bool {
        self.failed_rows() == 0
    }

    #[must_use]
    pub fn row(&self, row_id: &str) -> Option<&RowReport> {
        self.rows.iter().find(|row| row.row_id == row_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenArtifacts {
    pub suite_report_path: PathBuf,
    pub outcomes_csv_path: PathBuf,
}

/// Fills a fresh message from one row's entries, then applies catalog
/// defaults for every active field the row left alone.
pub fn build_message<R: Rng + ?Sized>(
    builder: &MessageBuilder<'_>,
    row: &TestRow,
    rng: &mut R,
) -> IsoMessage {
    let catalog = builder.catalog();
    let mut message = IsoMessage::new();
    for entry in &row.entries {
        let de_id = catalog
            .field_for_name(&entry.field)
            .map_or_else(|| entry.field.clone(), |field| field.number().to_string());
        builder.set_typed_field(&mut message, &de_id, &entry.value, &entry.declared_type);
    }
    builder.apply_defaults(&mut message, rng);
    message
}

/// Build, canonicalize, validate. Only a transport failure is an `Err`.
pub fn run_row<R: Rng + ?Sized>(
    dispatcher: &RuleDispatcher<'_>,
    oracle: &dyn CanonicalOracle,
    row: &TestRow,
    rng: &mut R,
) -> Result<RowReport, (String, TransportError)> {
    let builder = MessageBuilder::new(dispatcher.catalog());
    let message = build_message(&builder, row, rng);
    let wire = builder.build(&message);

    let request = OracleRequest {
        row_id: &row.row_id,
        wire: &wire,
    };
    let canonical = oracle
        .canonicalize(&request)
        .and_then(|text| {
            serde_json::from_str::<Value>(&text)
                .map_err(|err| TransportError::InvalidResponse(err.to_string()))
        })
        .map_err(|err| {
            error!(row = %row.row_id, oracle = oracle.name(), error = %err, "canonicalization failed");
            (wire.clone(), err)
        })?;

    let result = dispatcher.validate(&message, &canonical, row.row_id.clone());
    let summary = result.summary();
    info!(
        row = %row.row_id,
        passed = summary.passed,
        failed = summary.failed,
        skipped = summary.skipped,
        "row validated"
    );

    Ok(RowReport {
        row_id: row.row_id.clone(),
        wire_sha256: hash_bytes(wire.as_bytes()),
        debug_view: builder.build_debug_view(&message),
        warnings: message.warnings().to_vec(),
        wire,
        result,
        summary,
    })
}

/// Runs every row through one oracle. Rows are independent; a transport
/// failure fails that row and the run moves on.
pub fn run_rows(
    catalog: &FieldCatalog,
    rows: &[TestRow],
    oracle: &dyn CanonicalOracle,
    seed: u64,
    reference_year: Option<i32>,
) -> Result<SuiteReport, HarnessError> {
    let mut dispatcher = RuleDispatcher::new(catalog);
    if let Some(year) = reference_year {
        dispatcher = dispatcher.with_reference_year(year);
    }
    let mut rng = StdRng::seed_from_u64(seed);

    let mut reports = Vec::with_capacity(rows.len());
    let mut transport_failures = Vec::new();
    for row in rows {
        match run_row(&dispatcher, oracle, row, &mut rng) {
            Ok(report) => reports.push(report),
            Err((wire, err)) => transport_failures.push(RowFailure {
                row_id: row.row_id.clone(),
                wire,
                error: err.to_string(),
            }),
        }
    }

    let aggregated = AggregatedResults::from_results(reports.iter().map(|report| &report.result));
    let hash_input = serde_json::to_vec(&(&reports, &transport_failures))?;
    Ok(SuiteReport {
        oracle: oracle.name().to_owned(),
        seed,
        rows: reports,
        transport_failures,
        aggregated,
        report_hash: format!("sha256:{}", hash_bytes(&hash_input)),
    })
}

pub fn build_oracle(
    config: &HarnessConfig,
    rows: &[TestRow],
) -> Result<Box<dyn CanonicalOracle>, HarnessError> {
    Ok(match config.oracle_mode {
        OracleMode::Recorded => Box::new(RecordedOracle::from_rows(rows)),
        OracleMode::Http => {
            let endpoint = config.endpoint.as_deref().ok_or_else(|| {
                TransportError::Unavailable("HTTP oracle needs an endpoint".to_owned())
            })?;
            Box::new(HttpOracle::new(endpoint)?)
        }
        OracleMode::Command => {
            let command = config.command.as_deref().ok_or_else(|| {
                TransportError::Unavailable("command oracle needs a command line".to_owned())
            })?;
            Box::new(CommandOracle::from_command_line(command)?)
        }
    })
}

pub fn run_suite(config: &HarnessConfig) -> Result<SuiteReport, HarnessError> {
    let catalog = FieldCatalog::from_path(&config.catalog_path)?;
    for issue in catalog.issues() {
        warn!(key = %issue.key, detail = %issue.detail, "catalog issue carried into run");
    }
    let rows = load_rows(&config.rows_path)?;
    if rows.is_empty() {
        return Err(HarnessError::FixtureFormat(format!(
            "no test rows under {}",
            config.rows_path.display()
        )));
    }
    let oracle = build_oracle(config, &rows)?;
    run_rows(
        &catalog,
        &rows,
        oracle.as_ref(),
        config.seed,
        config.reference_year,
    )
}

pub fn enforce_green(report: &SuiteReport) -> Result<(), HarnessError> {
    if report.is_green() {
        Ok(())
    } else {
        Err(HarnessError::GateFailed {
            rows: report.row_count(),
            failed_rows: report.failed_rows(),
        })
    }
}

/// Flat `row_id,de,status,expected,detail` table across all rows.
pub fn outcomes_csv_string(report: &SuiteReport) -> Result<String, HarnessError> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    writer.write_record(["row_id", "de", "status", "expected", "detail"])?;
    for row in &report.rows {
        for (field, outcome) in row.result.entries() {
            writer.write_record([
                row.row_id.as_str(),
                field.label().as_str(),
                outcome.status.as_str(),
                outcome.expected.as_str(),
                outcome.detail.as_str(),
            ])?;
        }
    }
    for failure in &report.transport_failures {
        writer.write_record([
            failure.row_id.as_str(),
            "",
            "transport_error",
            "",
            failure.error.as_str(),
        ])?;
    }
    let bytes = writer.into_inner().map_err(|err| err.into_error())?;
    String::from_utf8(bytes).map_err(|err| HarnessError::FixtureFormat(err.to_string()))
}

pub fn write_suite_artifacts(
    config: &HarnessConfig,
    report: &SuiteReport,
) -> Result<WrittenArtifacts, HarnessError> {
    write_suite_artifacts_to(&config.artifact_root, report)
}

pub fn write_suite_artifacts_to(
    root: &Path,
    report: &SuiteReport,
) -> Result<WrittenArtifacts, HarnessError> {
    fs::create_dir_all(root)?;

    let suite_report_path = root.join("suite_report.json");
    fs::write(&suite_report_path, serde_json::to_string_pretty(report)?)?;

    let outcomes_csv_path = root.join("field_outcomes.csv");
    fs::write(&outcomes_csv_path, outcomes_csv_string(report)?)?;

    Ok(WrittenArtifacts {
        suite_report_path,
        outcomes_csv_path,
    })
}

fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
