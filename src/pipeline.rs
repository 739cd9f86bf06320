//! Per-document processing and bounded-concurrency batches.
//!
//! A document goes through decode, detect, extract and encode. Documents never share
//! mutable state, so a batch fans them out over a fixed number of scoped worker threads
//! and collects the outcomes back in input order.

use crate::camt053_format::{Camt053Encoder, Clock, SystemClock};
use crate::config::PipelineConfig;
use crate::detector::DetectionResult;
use crate::error::{Error, Result};
use crate::external_adapter::ExternalExtractor;
use crate::ingest::DocumentSource;
use crate::profile::BankProfile;
use crate::types::AccountInfo;
use crate::OutputFormat;
use once_cell::sync::OnceCell;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;
use tracing::{error, info};
use uuid::Uuid;

/// Where transactions are extracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingMode {
    /// Local detection and extraction.
    Local,
    /// The external OCR provider.
    External,
}

impl FromStr for ProcessingMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(ProcessingMode::Local),
            "external" | "docuclipper" => Ok(ProcessingMode::External),
            _ => Err(Error::Validation(format!("Unknown processing mode: {}", s))),
        }
    }
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProcessingMode::Local => "local",
            ProcessingMode::External => "external",
        })
    }
}

/// One uploaded document.
#[derive(Debug, Clone)]
pub struct DocumentInput {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub mode: ProcessingMode,
    pub output_format: OutputFormat,
}

impl DocumentInput {
    pub fn new(
        bytes: impl Into<Vec<u8>>,
        filename: impl Into<String>,
        mode: ProcessingMode,
        output_format: OutputFormat,
    ) -> Self {
        Self {
            bytes: bytes.into(),
            filename: filename.into(),
            mode,
            output_format,
        }
    }
}

/// A successfully converted document.
#[derive(Debug, Clone)]
pub struct ProcessedDocument {
    pub file_id: Uuid,
    pub filename: String,
    pub transaction_count: usize,
    pub account_info: Option<AccountInfo>,
    pub detection: DetectionResult,
    pub output_format: OutputFormat,
    /// `{file_id}.{xml|json}`
    pub output_file: String,
    /// Lines or rows that were skipped during extraction.
    pub warnings: Vec<String>,
    /// Encoded camt.053 document.
    pub encoded: String,
}

impl ProcessedDocument {
    /// Write the encoded document into `dir` under its output file name.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(&self.output_file);
        fs::write(&path, &self.encoded)?;
        Ok(path)
    }
}

/// Outcome for one document of a batch.
#[derive(Debug)]
pub struct DocumentOutcome {
    pub filename: String,
    pub result: Result<ProcessedDocument>,
}

/// Per-document outcomes of a batch, in input order.
#[derive(Debug)]
pub struct BatchReport {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub outcomes: Vec<DocumentOutcome>,
}

impl BatchReport {
    fn from_outcomes(outcomes: Vec<DocumentOutcome>) -> Self {
        let successful = outcomes.iter().filter(|o| o.result.is_ok()).count();
        Self {
            total: outcomes.len(),
            successful,
            failed: outcomes.len() - successful,
            outcomes,
        }
    }
}

/// Converts documents into camt.053.
pub struct Pipeline<C: Clock = SystemClock> {
    config: PipelineConfig,
    encoder: Camt053Encoder<C>,
    external: OnceCell<ExternalExtractor>,
}

impl Pipeline<SystemClock> {
    pub fn new(config: PipelineConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock + Sync> Pipeline<C> {
    /// Pipeline whose encoder reads time from `clock`.
    pub fn with_clock(config: PipelineConfig, clock: C) -> Self {
        Self {
            config,
            encoder: Camt053Encoder::with_clock(clock),
            external: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Convert one document.
    pub fn process_document(&self, input: &DocumentInput) -> Result<ProcessedDocument> {
        let mut extraction = match input.mode {
            ProcessingMode::Local => {
                DocumentSource::decode(&input.bytes, &input.filename)?.extract()?
            }
            ProcessingMode::External => self.external()?.extract(
                &input.bytes,
                &input.filename,
                BankProfile::default_profile(),
            )?,
        };

        let detection = extraction.detection.clone();
        let warnings = std::mem::take(&mut extraction.warnings);
        let transaction_count = extraction.transactions.len();

        let document = extraction.into_document(input.output_format);
        let encoded = self.encoder.encode(&document)?;

        let file_id = Uuid::new_v4();
        info!(
            filename = %input.filename,
            %file_id,
            mode = %input.mode,
            bank = %detection.bank,
            confidence = detection.confidence,
            transactions = transaction_count,
            skipped = warnings.len(),
            "document processed"
        );

        Ok(ProcessedDocument {
            file_id,
            filename: input.filename.clone(),
            transaction_count,
            account_info: document.account_info,
            detection,
            output_format: input.output_format,
            output_file: format!("{}.{}", file_id, input.output_format.extension()),
            warnings,
            encoded,
        })
    }

    /// Convert many documents on at most `max_concurrency` threads.
    ///
    /// Fails only when the batch exceeds `max_batch_size`; individual document failures
    /// are reported in the returned outcomes.
    pub fn process_batch(&self, inputs: &[DocumentInput]) -> Result<BatchReport> {
        if inputs.len() > self.config.max_batch_size {
            return Err(Error::Validation(format!(
                "Batch of {} documents exceeds the limit of {}",
                inputs.len(),
                self.config.max_batch_size
            )));
        }

        let workers = self.config.max_concurrency.max(1).min(inputs.len());
        let next = AtomicUsize::new(0);
        let slots: Mutex<Vec<Option<Result<ProcessedDocument>>>> =
            Mutex::new(inputs.iter().map(|_| None).collect());

        thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    scope.spawn(|| loop {
                        let index = next.fetch_add(1, Ordering::SeqCst);
                        let Some(input) = inputs.get(index) else {
                            break;
                        };
                        let result = self.process_document(input);
                        if let Err(err) = &result {
                            error!(filename = %input.filename, "document failed: {}", err);
                        }
                        slots.lock().unwrap_or_else(PoisonError::into_inner)[index] = Some(result);
                    })
                })
                .collect();

            for handle in handles {
                if handle.join().is_err() {
                    error!("batch worker panicked");
                }
            }
        });

        let outcomes: Vec<DocumentOutcome> = slots
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .into_iter()
            .zip(inputs)
            .map(|(slot, input)| DocumentOutcome {
                filename: input.filename.clone(),
                result: slot.unwrap_or_else(|| {
                    Err(Error::Extraction(format!("processing of {} was aborted", input.filename)))
                }),
            })
            .collect();

        let report = BatchReport::from_outcomes(outcomes);
        info!(
            total = report.total,
            successful = report.successful,
            failed = report.failed,
            "batch finished"
        );
        Ok(report)
    }

    fn external(&self) -> Result<&ExternalExtractor> {
        self.external
            .get_or_try_init(|| ExternalExtractor::new(&self.config.external))
    }
}
