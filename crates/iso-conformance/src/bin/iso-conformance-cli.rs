#![forbid(unsafe_code)]

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use iso_conformance::{
    HarnessConfig, OracleMode, enforce_green, run_suite, write_suite_artifacts,
};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OracleArg {
    Recorded,
    Http,
    Command,
}

impl From<OracleArg> for OracleMode {
    fn from(value: OracleArg) -> Self {
        match value {
            OracleArg::Recorded => Self::Recorded,
            OracleArg::Http => Self::Http,
            OracleArg::Command => Self::Command,
        }
    }
}

/// Build ISO 8583 messages from test rows, canonicalize them and validate
/// every populated field.
#[derive(Parser, Debug)]
#[command(name = "iso-conformance-cli")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Field catalog JSON (defaults to the bundled fixture)
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Row file (.json / .csv) or a directory of them
    #[arg(long)]
    rows: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "recorded")]
    oracle: OracleArg,

    /// Canonicalization service URL for `--oracle http`
    #[arg(long)]
    endpoint: Option<String>,

    /// Command line for `--oracle command`; wire on stdin, JSON on stdout
    #[arg(long)]
    command: Option<String>,

    /// Seed for generated default field values
    #[arg(long, default_value_t = iso_conformance::DEFAULT_SEED)]
    seed: u64,

    /// Year used to complete MMDD dates (defaults to the current year)
    #[arg(long)]
    reference_year: Option<i32>,

    /// Directory for suite_report.json and field_outcomes.csv
    #[arg(long)]
    artifact_root: Option<PathBuf>,

    #[arg(long)]
    write_artifacts: bool,

    /// Exit non-zero when any row fails
    #[arg(long)]
    require_green: bool,

    /// Print the per-row outcome tables
    #[arg(long)]
    print_rows: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut config = HarnessConfig::default_paths();
    if let Some(catalog) = cli.catalog {
        config.catalog_path = catalog;
    }
    if let Some(rows) = cli.rows {
        config.rows_path = rows;
    }
    if let Some(root) = cli.artifact_root {
        config.artifact_root = root;
    }
    config.oracle_mode = cli.oracle.into();
    config.endpoint = cli.endpoint;
    config.command = cli.command;
    config.seed = cli.seed;
    config.reference_year = cli.reference_year;

    let report = run_suite(&config)?;
    if cli.print_rows {
        for row in &report.rows {
            println!("wire={} sha256={}", row.wire, row.wire_sha256);
            print!("{}", row.result.render_plain());
        }
    }
    for failure in &report.transport_failures {
        println!("row={} transport_error={}", failure.row_id, failure.error);
    }
    print!("{}", report.aggregated.render_plain());
    println!(
        "oracle={} rows={} failed_rows={} green={} report_hash={}",
        report.oracle,
        report.row_count(),
        report.failed_rows(),
        report.is_green(),
        report.report_hash
    );

    if cli.write_artifacts {
        let written = write_suite_artifacts(&config, &report)?;
        println!(
            "wrote report={} outcomes={}",
            written.suite_report_path.display(),
            written.outcomes_csv_path.display()
        );
    }

    if cli.require_green {
        enforce_green(&report)?;
    }
    Ok(())
}
