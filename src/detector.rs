//! Bank and layout detection.
//!
//! Detection is a heuristic over sampled text: each known bank has a handful of name
//! patterns and every match adds 0.3 to that bank's score. The detector never fails;
//! anything it cannot read comes back as [`Bank::Unknown`] with zero confidence.

use crate::profile::{Bank, BankProfile};
use crate::types::Grid;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Score added per pattern match.
const MATCH_WEIGHT: f64 = 0.3;

/// Number of leading pages sampled from text documents.
const SAMPLE_PAGES: usize = 2;

/// Number of data rows sampled from spreadsheets.
const SAMPLE_ROWS: usize = 10;

/// Page separator emitted by PDF text extraction.
pub const PAGE_BREAK: char = '\x0c';

const BANK_NAME_PATTERNS: &[(Bank, &[&str])] = &[
    (Bank::Gtbank, &[r"guaranty\s*trust\s*bank", r"gtbank", r"gtb"]),
    (Bank::AccessBank, &[r"access\s*bank", r"accessbank"]),
    (Bank::ZenithBank, &[r"zenith\s*bank", r"zenithbank"]),
    (Bank::Uba, &[r"united\s*bank\s*for\s*africa", r"uba"]),
    (Bank::FirstBank, &[r"first\s*bank", r"firstbank"]),
    (Bank::StanbicIbtc, &[r"stanbic\s*ibtc", r"stanbicibtc"]),
    (Bank::FidelityBank, &[r"fidelity\s*bank", r"fidelitybank"]),
    (Bank::UnionBank, &[r"union\s*bank", r"unionbank"]),
];

static BANK_PATTERNS: Lazy<Vec<(Bank, Vec<Regex>)>> = Lazy::new(|| {
    BANK_NAME_PATTERNS
        .iter()
        .map(|(bank, patterns)| {
            let compiled = patterns
                .iter()
                .map(|p| Regex::new(&format!("(?i){}", p)).expect("bank pattern"))
                .collect();
            (*bank, compiled)
        })
        .collect()
});

static RE_TABLE_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)date.*description.*amount").expect("table header pattern"));
static RE_DEBIT_CREDIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)debit.*credit").expect("debit/credit pattern"));

/// Structural style of a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutStyle {
    /// Text with a date/description/amount column header.
    Tabular,
    /// Free-flowing text.
    Narrative,
    /// Row/column data.
    Spreadsheet,
    Unknown,
}

/// Lowercased extension of `filename`, or an empty string when it has none.
pub fn file_extension(filename: &str) -> String {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default()
}

/// Kind of source a document was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Pdf,
    Spreadsheet,
    Text,
    Unknown,
}

impl FileType {
    /// Classify a declared filename by its extension.
    pub fn from_filename(filename: &str) -> Self {
        match file_extension(filename).as_str() {
            "pdf" => FileType::Pdf,
            "csv" | "tsv" | "xls" | "xlsx" => FileType::Spreadsheet,
            "txt" => FileType::Text,
            _ => FileType::Unknown,
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FileType::Pdf => "pdf",
            FileType::Spreadsheet => "spreadsheet",
            FileType::Text => "text",
            FileType::Unknown => "unknown",
        })
    }
}

/// Outcome of bank/layout detection for one document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionResult {
    pub bank: Bank,
    pub style: LayoutStyle,
    /// Heuristic certainty in `[0, 1]`.
    pub confidence: f64,
    pub file_type: FileType,
    pub pages: Option<usize>,
    pub rows: Option<usize>,
    pub columns: Option<usize>,
    pub has_table: bool,
    pub has_debit_credit: bool,
    pub has_date_column: bool,
    pub has_amount_column: bool,
}

impl DetectionResult {
    /// Nothing recognised.
    pub fn unknown(file_type: FileType) -> Self {
        Self {
            bank: Bank::Unknown,
            style: LayoutStyle::Unknown,
            confidence: 0.0,
            file_type,
            pages: None,
            rows: None,
            columns: None,
            has_table: false,
            has_debit_credit: false,
            has_date_column: false,
            has_amount_column: false,
        }
    }

    /// Profile of the detected bank.
    pub fn profile(&self) -> &'static BankProfile {
        self.bank.profile()
    }
}

/// Score text against every known bank.
///
/// Returns the best bank and its confidence; ties go to the bank declared first.
pub fn match_bank_patterns(text: &str) -> (Bank, f64) {
    let text = text.to_lowercase();
    let mut best = (Bank::Unknown, 0.0_f64);

    for (bank, patterns) in BANK_PATTERNS.iter() {
        let matches: usize = patterns.iter().map(|re| re.find_iter(&text).count()).sum();
        let score = matches as f64 * MATCH_WEIGHT;
        if score > best.1 {
            best = (*bank, score);
        }
    }

    (best.0, best.1.min(1.0))
}

/// Detect bank and style from page text. Pages are separated by form feeds.
pub fn detect_text(text: &str, file_type: FileType) -> DetectionResult {
    if text.trim().is_empty() {
        debug!(%file_type, "no text to sample, bank unknown");
        return DetectionResult::unknown(file_type);
    }

    let pages: Vec<&str> = text.split(PAGE_BREAK).collect();
    let sample = pages
        .iter()
        .take(SAMPLE_PAGES)
        .copied()
        .collect::<Vec<_>>()
        .join("\n");

    let (bank, confidence) = match_bank_patterns(&sample);
    let has_table = RE_TABLE_HEADER.is_match(&sample);
    let has_debit_credit = RE_DEBIT_CREDIT.is_match(&sample);

    debug!(%bank, confidence, has_table, "detected text layout");

    DetectionResult {
        bank,
        style: if has_table {
            LayoutStyle::Tabular
        } else {
            LayoutStyle::Narrative
        },
        confidence,
        file_type,
        pages: Some(pages.len()),
        has_table,
        has_debit_credit,
        ..DetectionResult::unknown(file_type)
    }
}

/// Detect bank from spreadsheet cells. The style is always [`LayoutStyle::Spreadsheet`].
pub fn detect_grid(grid: &Grid) -> DetectionResult {
    if grid.is_empty() {
        debug!("empty grid, bank unknown");
        return DetectionResult::unknown(FileType::Spreadsheet);
    }

    let headers: Vec<String> = grid
        .headers
        .clone()
        .or_else(|| grid.rows.first().cloned())
        .unwrap_or_default()
        .iter()
        .map(|h| h.to_lowercase())
        .collect();

    let mut sample: Vec<&str> = grid
        .rows
        .iter()
        .take(SAMPLE_ROWS)
        .flat_map(|row| row.iter().map(String::as_str))
        .collect();
    sample.extend(headers.iter().map(String::as_str));

    let (bank, confidence) = match_bank_patterns(&sample.join(" "));
    let has_date_column = headers.iter().any(|h| h.contains("date"));
    let has_amount_column = headers
        .iter()
        .any(|h| h.contains("amount") || h.contains("debit") || h.contains("credit"));

    debug!(%bank, confidence, rows = grid.rows.len(), "detected spreadsheet layout");

    DetectionResult {
        bank,
        style: LayoutStyle::Spreadsheet,
        confidence,
        file_type: FileType::Spreadsheet,
        rows: Some(grid.rows.len()),
        columns: Some(grid.column_count()),
        has_date_column,
        has_amount_column,
        ..DetectionResult::unknown(FileType::Spreadsheet)
    }
}
