//! Transaction extraction from spreadsheet exports.
//!
//! Column roles are inferred from header text through ordered keyword tables, so the
//! same code handles "Trans Date / Narration / Withdrawals / Lodgements" and
//! "Value Date / Description / Debit / Credit" layouts.

use crate::detector::{self, DetectionResult};
use crate::error::{Error, Result};
use crate::normalizer::{classify_single_amount, parse_amount, parse_date, split_debit_credit};
use crate::profile::BankProfile;
use crate::text_extractor::scan_account_info;
use crate::types::{AccountInfo, DebitCredit, Extraction, Grid, Transaction};
use csv::ReaderBuilder;
use rust_decimal::Decimal;
use std::io::Read;
use tracing::{debug, warn};

/// Any of these in a row marks it as the header row.
const HEADER_KEYWORDS: &[&str] = &[
    "date",
    "transaction",
    "description",
    "amount",
    "debit",
    "credit",
    "balance",
];

// Matched as substrings: "date" also covers "Trans Date" and "Value Date".
const DATE_KEYWORDS: &[&str] = &["date"];
const DESCRIPTION_KEYWORDS: &[&str] =
    &["description", "narration", "details", "remarks", "particulars"];
const DEBIT_KEYWORDS: &[&str] = &["debit", "withdrawal", "dr"];
const CREDIT_KEYWORDS: &[&str] = &["credit", "deposit", "lodgement", "cr"];
const BALANCE_KEYWORDS: &[&str] = &["balance"];
const AMOUNT_KEYWORDS: &[&str] = &["amount"];

/// Column index for each role the extractor understands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMap {
    pub date: Option<usize>,
    pub description: Option<usize>,
    pub debit: Option<usize>,
    pub credit: Option<usize>,
    pub balance: Option<usize>,
    /// Only set when neither a debit nor a credit column exists.
    pub amount: Option<usize>,
}

impl ColumnMap {
    /// Infer column roles from header text.
    ///
    /// For each role the keyword list is tried in order and the first column matching a
    /// keyword wins. A column is never given two roles.
    pub fn infer<S: AsRef<str>>(headers: &[S]) -> Self {
        let headers: Vec<String> = headers
            .iter()
            .map(|h| h.as_ref().trim().to_lowercase())
            .collect();
        let mut taken: Vec<usize> = Vec::new();
        let mut resolve = |keywords: &[&str]| -> Option<usize> {
            let found = keywords.iter().find_map(|keyword| {
                headers
                    .iter()
                    .enumerate()
                    .find(|(i, header)| !taken.contains(i) && header_matches(header, keyword))
                    .map(|(i, _)| i)
            });
            if let Some(i) = found {
                taken.push(i);
            }
            found
        };

        let date = resolve(DATE_KEYWORDS);
        let description = resolve(DESCRIPTION_KEYWORDS);
        let debit = resolve(DEBIT_KEYWORDS);
        let credit = resolve(CREDIT_KEYWORDS);
        let balance = resolve(BALANCE_KEYWORDS);
        let amount = if debit.is_none() && credit.is_none() {
            resolve(AMOUNT_KEYWORDS)
        } else {
            None
        };

        Self {
            date,
            description,
            debit,
            credit,
            balance,
            amount,
        }
    }

    fn has_amount_columns(&self) -> bool {
        self.debit.is_some() || self.credit.is_some() || self.amount.is_some()
    }
}

/// Two-letter abbreviations ("DR", "CR") must be a whole token.
/// Longer keywords may be substrings.
fn header_matches(header: &str, keyword: &str) -> bool {
    if keyword.len() <= 2 {
        header
            .split(|c: char| !c.is_alphanumeric())
            .any(|token| token == keyword)
    } else {
        header.contains(keyword)
    }
}

/// Index of the first row that looks like a column header.
pub fn find_header_row(rows: &[Vec<String>]) -> Option<usize> {
    rows.iter().position(|row| {
        row.iter().any(|cell| {
            let cell = cell.to_lowercase();
            HEADER_KEYWORDS.iter().any(|keyword| cell.contains(keyword))
        })
    })
}

/// Read a CSV/TSV export into a grid. No header row is assumed; ragged rows are kept.
pub fn read_delimited<R: Read>(reader: R, delimiter: u8) -> Result<Grid> {
    let mut csv_reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(reader);

    let mut rows = Vec::new();
    for record in csv_reader.records() {
        let record = record?;
        rows.push(
            record
                .iter()
                .map(|cell| cell.trim_start_matches('\u{feff}').trim().to_string())
                .collect(),
        );
    }

    Ok(Grid::from_rows(rows))
}

/// Detect the bank, then extract transactions from the grid.
///
/// Fails only when the grid holds no cells at all.
pub fn extract(grid: &Grid) -> Result<Extraction> {
    let detection = detector::detect_grid(grid);
    let profile = detection.profile();
    extract_with_profile(grid, profile, detection)
}

/// Extract using an already chosen profile.
pub fn extract_with_profile(
    grid: &Grid,
    profile: &BankProfile,
    detection: DetectionResult,
) -> Result<Extraction> {
    if grid.is_empty() {
        return Err(Error::Extraction("spreadsheet has no rows".to_string()));
    }

    let (headers, data, preamble): (Vec<String>, &[Vec<String>], &[Vec<String>]) =
        match (&grid.headers, find_header_row(&grid.rows)) {
            (Some(headers), _) => (headers.clone(), &grid.rows[..], &grid.rows[..0]),
            (None, Some(index)) => (
                grid.rows[index].clone(),
                &grid.rows[index + 1..],
                &grid.rows[..index],
            ),
            (None, None) => (Vec::new(), &grid.rows[..], &grid.rows[..0]),
        };

    let columns = ColumnMap::infer(&headers);
    debug!(?columns, "inferred column roles");

    let account_info = if preamble.is_empty() {
        AccountInfo {
            bank_name: profile.known_name().map(str::to_string),
            ..AccountInfo::default()
        }
    } else {
        let header = preamble
            .iter()
            .map(|row| row.join(" "))
            .collect::<Vec<_>>()
            .join(" ");
        scan_account_info(&header, profile)
    };

    let mut transactions = Vec::new();
    let mut warnings = Vec::new();

    if columns.date.is_none() {
        warn!("no date column found, spreadsheet yields no transactions");
        warnings.push("no date column found".to_string());
    } else if !columns.has_amount_columns() {
        warn!("no amount columns found, spreadsheet yields no transactions");
        warnings.push("no debit, credit or amount column found".to_string());
    } else {
        for (offset, row) in data.iter().enumerate() {
            match parse_row(row, &columns, profile) {
                Some(Ok(transaction)) => transactions.push(transaction),
                Some(Err(message)) => {
                    warn!(row = offset + 1, "skipping spreadsheet row: {}", message);
                    warnings.push(format!("row {}: {}", offset + 1, message));
                }
                None => {}
            }
        }
    }

    debug!(
        bank = %profile.bank,
        transactions = transactions.len(),
        skipped = warnings.len(),
        "spreadsheet extraction finished"
    );

    Ok(Extraction {
        transactions,
        account_info,
        detection,
        warnings,
    })
}

/// Parse one data row. `None` means the row has no usable date and is not a transaction.
pub fn parse_row(
    row: &[String],
    columns: &ColumnMap,
    profile: &BankProfile,
) -> Option<std::result::Result<Transaction, String>> {
    let cell = |index: Option<usize>| cell_at(row, index);

    let date = parse_date(cell(columns.date), profile)?;
    let description = cell(columns.description).to_string();

    let (debit, credit, kind): (Decimal, Decimal, DebitCredit) = if columns.amount.is_some() {
        let raw = cell(columns.amount);
        if raw.is_empty() {
            return Some(Err("amount cell is empty".to_string()));
        }
        let amount = parse_amount(raw, profile);
        if amount < Decimal::ZERO {
            (amount.abs(), Decimal::ZERO, DebitCredit::Debit)
        } else {
            classify_single_amount(amount, &description)
        }
    } else {
        let raw_debit = cell(columns.debit);
        let raw_credit = cell(columns.credit);
        if raw_debit.is_empty() && raw_credit.is_empty() {
            return Some(Err("debit and credit cells are empty".to_string()));
        }
        split_debit_credit(parse_amount(raw_debit, profile), parse_amount(raw_credit, profile))
    };

    let raw_balance = cell(columns.balance);
    let balance = (!raw_balance.is_empty()).then(|| parse_amount(raw_balance, profile));

    Some(Ok(
        Transaction::new(Some(date), description, debit, credit, kind, profile.currency)
            .with_balance(balance),
    ))
}

fn cell_at(row: &[String], index: Option<usize>) -> &str {
    index
        .and_then(|i| row.get(i))
        .map(|c| c.trim())
        .unwrap_or("")
}
