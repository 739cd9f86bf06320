//! Bank Statement Converter - CLI tool for converting statements to camt.053.

use bankstate::pipeline::{BatchReport, DocumentInput, Pipeline, ProcessingMode};
use bankstate::{OutputFormat, PipelineConfig, Result};
use clap::Parser;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bankstate_converter")]
#[command(
    about = "Convert bank statements (PDF, CSV, TSV, TXT, XLS, XLSX) to ISO 20022 camt.053",
    long_about = None
)]
struct Cli {
    /// Input statement files
    #[arg(short, long, num_args = 1.., required = true)]
    input: Vec<PathBuf>,

    /// Output format (xml, json)
    #[arg(long = "output-format", default_value = "xml", env = "BANKSTATE_OUTPUT_FORMAT")]
    output_format: String,

    /// Processing mode (local, external)
    #[arg(long, default_value = "local", env = "BANKSTATE_MODE")]
    mode: String,

    /// Directory for the encoded documents
    #[arg(short, long = "output-dir", default_value = ".")]
    output_dir: PathBuf,

    /// API key for the external extraction provider
    #[arg(long = "api-key", env = "BANKSTATE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Number of documents processed in parallel
    #[arg(long)]
    concurrency: Option<usize>,
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    match run() {
        Ok(report) if report.failed == 0 => {}
        Ok(_) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn run() -> Result<BatchReport> {
    let cli = Cli::parse();

    // Parse options
    let output_format = cli.output_format.parse::<OutputFormat>()?;
    let mode = cli.mode.parse::<ProcessingMode>()?;

    let mut config = PipelineConfig::from_env()?;
    if let Some(api_key) = cli.api_key {
        config.external.api_key = Some(api_key);
    }
    if let Some(concurrency) = cli.concurrency {
        config.max_concurrency = concurrency;
    }
    config.validate()?;

    let inputs = cli
        .input
        .iter()
        .map(|path| read_input(path, mode, output_format))
        .collect::<Result<Vec<_>>>()?;

    fs::create_dir_all(&cli.output_dir)?;
    let report = Pipeline::new(config).process_batch(&inputs)?;

    for outcome in &report.outcomes {
        match &outcome.result {
            Ok(processed) => {
                let path = processed.write_to(&cli.output_dir)?;
                println!(
                    "OK    {} -> {} ({} transactions, bank: {}, confidence {:.1})",
                    outcome.filename,
                    path.display(),
                    processed.transaction_count,
                    processed.detection.bank,
                    processed.detection.confidence
                );
                for warning in &processed.warnings {
                    println!("      warning: {}", warning);
                }
            }
            Err(e) => println!("FAIL  {}: {}", outcome.filename, e),
        }
    }
    println!(
        "{} documents: {} successful, {} failed",
        report.total, report.successful, report.failed
    );

    Ok(report)
}

fn read_input(
    path: &Path,
    mode: ProcessingMode,
    output_format: OutputFormat,
) -> Result<DocumentInput> {
    let bytes = fs::read(path)?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(DocumentInput::new(bytes, filename, mode, output_format))
}
