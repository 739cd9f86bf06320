//! Transaction extraction from PDF-derived text.
//!
//! Each non-empty line is matched against one composite statement-line pattern:
//!
//! ```text
//! <date> <description> <amount> [<amount>] <balance>
//! ```
//!
//! With two amounts the first is the debit column and the second the credit column.
//! With one amount the description decides (see [`classify_single_amount`]). Lines that
//! do not look like a statement line are headers, footers or page furniture and are
//! skipped without comment.

use crate::detector::{self, DetectionResult, FileType};
use crate::error::{Error, Result};
use crate::normalizer::{classify_single_amount, parse_amount, parse_date, split_debit_credit};
use crate::profile::BankProfile;
use crate::types::{AccountInfo, Extraction, StatementPeriod, Transaction};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

/// Lines scanned for account metadata.
const HEADER_LINES: usize = 10;

const DATE: &str = r"\d{4}-\d{2}-\d{2}|\d{1,2}[/-]\d{1,2}[/-]\d{2,4}|\d{1,2}-[A-Za-z]{3}-\d{2,4}";
const AMOUNT: &str = r"[-(]?(?:₦|NGN)?(?:\d{1,3}(?:,\d{3})+|\d+)\.\d{2}\)?";
const HEADER_AMOUNT: &str = r"[-(]?(?:₦|NGN)?\s?(?:\d{1,3}(?:,\d{3})+|\d+)(?:\.\d+)?\)?";

static RE_STATEMENT_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        concat!(
            r"^(?P<date>{date})\s+(?P<description>.+?)\s+(?P<first>{amount})",
            r"(?:\s+(?P<second>{amount}))?\s+(?P<balance>{amount})$",
        ),
        date = DATE,
        amount = AMOUNT,
    ))
    .expect("statement line pattern")
});

static RE_ACCOUNT_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)account\s*(?:no|number|num|#)\.?\s*:?\s*(\d{6,})")
        .expect("account number pattern")
});

static RE_ACCOUNT_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i)account\s*name\s*:?\s*([a-z][a-z .,&'-]*?)\s*",
        r"(?:\s{2}|\b(?:account|period|from|opening|closing|statement|currency|address|branch)",
        r"\b|$)",
    ))
    .expect("account name pattern")
});

static RE_PERIOD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)(?:period|from)\s*:?\s*(?P<from>{DATE})\s*(?:to|-|–)\s*(?P<to>{DATE})"
    ))
    .expect("statement period pattern")
});

static RE_OPENING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)opening\s*balance\s*:?\s*(?P<amount>{HEADER_AMOUNT})"))
        .expect("opening balance pattern")
});

static RE_CLOSING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)closing\s*balance\s*:?\s*(?P<amount>{HEADER_AMOUNT})"))
        .expect("closing balance pattern")
});

/// Detect the bank, then extract transactions and account metadata from page text.
///
/// Fails only when no page carries any text at all.
pub fn extract(text: &str, file_type: FileType) -> Result<Extraction> {
    let detection = detector::detect_text(text, file_type);
    let profile = detection.profile();
    extract_with_profile(text, profile, detection)
}

/// Extract using an already chosen profile.
pub fn extract_with_profile(
    text: &str,
    profile: &BankProfile,
    detection: DetectionResult,
) -> Result<Extraction> {
    if text.split(detector::PAGE_BREAK).all(|page| page.trim().is_empty()) {
        return Err(Error::Extraction("document has no extractable text".to_string()));
    }

    let lines: Vec<&str> = text
        .lines()
        .flat_map(|line| line.split(detector::PAGE_BREAK))
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    let header = lines.iter().take(HEADER_LINES).copied().collect::<Vec<_>>().join(" ");
    let account_info = scan_account_info(&header, profile);

    let mut transactions = Vec::new();
    let mut warnings = Vec::new();

    for (index, line) in lines.iter().enumerate() {
        match parse_line(line, profile) {
            Some(Ok(transaction)) => transactions.push(transaction),
            Some(Err(message)) => {
                warn!(line = index + 1, "skipping statement line: {}", message);
                warnings.push(format!("line {}: {}", index + 1, message));
            }
            None => {}
        }
    }

    debug!(
        bank = %profile.bank,
        transactions = transactions.len(),
        skipped = warnings.len(),
        "text extraction finished"
    );

    Ok(Extraction {
        transactions,
        account_info,
        detection,
        warnings,
    })
}

/// Parse one line. `None` means the line is not a statement line at all.
pub fn parse_line(
    line: &str,
    profile: &BankProfile,
) -> Option<std::result::Result<Transaction, String>> {
    let caps = RE_STATEMENT_LINE.captures(line.trim())?;

    let raw_date = &caps["date"];
    let Some(date) = parse_date(raw_date, profile) else {
        return Some(Err(format!("unparseable date '{}'", raw_date)));
    };

    let description = caps["description"].trim().to_string();
    let first = parse_amount(&caps["first"], profile);
    let (debit, credit, kind) = match caps.name("second") {
        Some(second) => split_debit_credit(first, parse_amount(second.as_str(), profile)),
        None => classify_single_amount(first, &description),
    };
    let balance = parse_amount(&caps["balance"], profile);

    Some(Ok(Transaction::new(Some(date), description, debit, credit, kind, profile.currency)
        .with_balance(Some(balance))))
}

/// Scan a header region for account metadata. Each field is optional; the first match wins.
pub fn scan_account_info(header: &str, profile: &BankProfile) -> AccountInfo {
    let account_number = RE_ACCOUNT_NUMBER
        .captures(header)
        .map(|c| c[1].to_string());

    let account_name = RE_ACCOUNT_NAME
        .captures(header)
        .map(|c| c[1].trim().to_string())
        .filter(|name| !name.is_empty());

    let statement_period = RE_PERIOD.captures(header).and_then(|c| {
        let from = parse_date(&c["from"], profile)?;
        let to = parse_date(&c["to"], profile)?;
        Some(StatementPeriod { from, to })
    });

    let opening_balance = RE_OPENING
        .captures(header)
        .map(|c| parse_amount(&c["amount"], profile));
    let closing_balance = RE_CLOSING
        .captures(header)
        .map(|c| parse_amount(&c["amount"], profile));

    AccountInfo {
        account_number,
        account_name,
        bank_name: profile.known_name().map(str::to_string),
        statement_period,
        opening_balance,
        closing_balance,
    }
}
