//! Bank Statement to camt.053 Library
//!
//! A library for turning bank statement documents into ISO 20022 camt.053 statements.
//!
//! # Pipeline
//!
//! - **Ingest**: decode PDF text or CSV/TSV exports ([`ingest`])
//! - **Detect**: identify the issuing bank and layout ([`detector`])
//! - **Extract**: recover transactions and account metadata from text ([`text_extractor`]),
//!   cell grids ([`tabular_extractor`]) or an external OCR provider ([`external_adapter`])
//! - **Encode**: project the ledger into camt.053 XML or JSON ([`camt053_format`])
//!
//! # Examples
//!
//! ## Extracting a text statement
//!
//! ```
//! use bankstate::detector::FileType;
//! use bankstate::text_extractor;
//!
//! let text = "ZENITH BANK\n01/11/2025 POS PURCHASE 1,500.00 8,500.00";
//! let extraction = text_extractor::extract(text, FileType::Text)?;
//! assert_eq!(extraction.transactions.len(), 1);
//! # Ok::<(), bankstate::Error>(())
//! ```
//!
//! ## Processing a file end to end
//!
//! ```no_run
//! use bankstate::pipeline::{DocumentInput, Pipeline, ProcessingMode};
//! use bankstate::{OutputFormat, PipelineConfig};
//!
//! let bytes = std::fs::read("statement.pdf")?;
//! let pipeline = Pipeline::new(PipelineConfig::default());
//! let input =
//!     DocumentInput::new(bytes, "statement.pdf", ProcessingMode::Local, OutputFormat::Xml);
//! let processed = pipeline.process_document(&input)?;
//! std::fs::write(&processed.output_file, processed.encoded)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod camt053_format;
pub mod config;
pub mod detector;
pub mod error;
pub mod external_adapter;
pub mod ingest;
pub mod normalizer;
pub mod pipeline;
pub mod profile;
pub mod tabular_extractor;
pub mod text_extractor;
pub mod types;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// Re-export commonly used types
pub use config::{ExternalConfig, PipelineConfig};
pub use error::{Error, Result};
pub use profile::{Bank, BankProfile};
pub use types::{
    AccountInfo, DebitCredit, Extraction, Grid, StatementDocument, StatementPeriod, Transaction,
};

/// Encodings of the camt.053 output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// camt.053 XML document
    Xml,
    /// JSON mirror of the XML tree
    Json,
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "xml" | "camt053" | "camt.053" => Ok(OutputFormat::Xml),
            "json" => Ok(OutputFormat::Json),
            _ => Err(Error::Mapping(format!("Unsupported output format: {}", s))),
        }
    }
}

impl OutputFormat {
    /// Get file extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Xml => "xml",
            OutputFormat::Json => "json",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("xml".parse::<OutputFormat>().unwrap(), OutputFormat::Xml);
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("camt053".parse::<OutputFormat>().unwrap(), OutputFormat::Xml);
    }

    #[test]
    fn test_unsupported_output_format() {
        let err = "pdf".parse::<OutputFormat>().unwrap_err();
        assert!(matches!(err, Error::Mapping(_)));
    }

    #[test]
    fn test_output_format_extension() {
        assert_eq!(OutputFormat::Xml.extension(), "xml");
        assert_eq!(OutputFormat::Json.extension(), "json");
    }
}
