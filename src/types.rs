//! Canonical statement data shared by every extractor and the encoder.

use crate::detector::DetectionResult;
use crate::OutputFormat;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Represents a single statement line.
///
/// Built through [`Transaction::new`] so that `amount == credit - debit` always holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Booking date. Only external payloads may leave this unset.
    pub date: Option<NaiveDate>,

    /// Transaction description/narration.
    pub description: String,

    /// Outgoing amount (never negative).
    pub debit: Decimal,

    /// Incoming amount (never negative).
    pub credit: Decimal,

    /// Signed net amount, `credit - debit`.
    pub amount: Decimal,

    /// Classified direction of the transaction.
    pub debit_credit: DebitCredit,

    /// Balance after the transaction, when the statement prints one.
    pub balance: Option<Decimal>,

    /// Currency code (e.g., NGN, USD).
    pub currency: String,

    /// Bank or provider reference.
    pub reference: Option<String>,
}

impl Transaction {
    /// Create a transaction from its debit and credit sides.
    ///
    /// Both sides are stored as absolute values and the net amount is derived from them.
    pub fn new(
        date: Option<NaiveDate>,
        description: impl Into<String>,
        debit: Decimal,
        credit: Decimal,
        debit_credit: DebitCredit,
        currency: impl Into<String>,
    ) -> Self {
        let debit = debit.abs();
        let credit = credit.abs();
        Self {
            date,
            description: description.into(),
            debit,
            credit,
            amount: credit - debit,
            debit_credit,
            balance: None,
            currency: currency.into(),
            reference: None,
        }
    }

    /// Attach the running balance printed next to the transaction.
    pub fn with_balance(mut self, balance: Option<Decimal>) -> Self {
        self.balance = balance;
        self
    }

    /// Attach an external reference.
    pub fn with_reference(mut self, reference: Option<String>) -> Self {
        self.reference = reference.filter(|r| !r.trim().is_empty());
        self
    }

    /// Whether the net amount agrees with the debit and credit sides.
    pub fn is_balanced(&self) -> bool {
        self.amount == self.credit - self.debit
    }
}

/// Debit/Credit indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebitCredit {
    /// Debit transaction (outgoing).
    Debit,
    /// Credit transaction (incoming).
    Credit,
}

impl FromStr for DebitCredit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "D" | "DR" | "DBIT" | "DEBIT" => Ok(DebitCredit::Debit),
            "C" | "CR" | "CRDT" | "CREDIT" => Ok(DebitCredit::Credit),
            _ => Err(format!("Invalid debit/credit indicator: {}", s)),
        }
    }
}

impl DebitCredit {
    /// Convert to ISO 20022 format.
    pub fn to_iso_format(&self) -> &'static str {
        match self {
            DebitCredit::Debit => "DBIT",
            DebitCredit::Credit => "CRDT",
        }
    }

    /// ISO 20022 bank transaction family code for a payment in this direction.
    pub fn to_family_code(&self) -> &'static str {
        match self {
            DebitCredit::Debit => "ICDT",
            DebitCredit::Credit => "RCDT",
        }
    }
}

/// Statement period printed in the document header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementPeriod {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

/// Account metadata recovered from the statement header. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    /// Bank account number.
    pub account_number: Option<String>,

    /// Account holder name.
    pub account_name: Option<String>,

    /// Bank name.
    pub bank_name: Option<String>,

    /// Statement period.
    pub statement_period: Option<StatementPeriod>,

    /// Opening balance.
    pub opening_balance: Option<Decimal>,

    /// Closing balance.
    pub closing_balance: Option<Decimal>,
}

impl AccountInfo {
    /// True when nothing at all was recovered.
    pub fn is_empty(&self) -> bool {
        self == &AccountInfo::default()
    }
}

/// Spreadsheet-derived cells.
///
/// `headers` is set when the source already separated them (a named-column export);
/// otherwise the header row is searched for among `rows`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Grid {
    pub headers: Option<Vec<String>>,
    pub rows: Vec<Vec<String>>,
}

impl Grid {
    /// Grid whose header row is still somewhere among the rows.
    pub fn from_rows(rows: Vec<Vec<String>>) -> Self {
        Self { headers: None, rows }
    }

    /// Grid with named columns.
    pub fn with_headers(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self {
            headers: Some(headers),
            rows,
        }
    }

    /// Widest row, counting the headers.
    pub fn column_count(&self) -> usize {
        self.headers
            .iter()
            .chain(self.rows.iter())
            .map(Vec::len)
            .max()
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(|row| row.iter().all(|cell| cell.trim().is_empty()))
            && self.headers.as_ref().map_or(true, |h| h.is_empty())
    }
}

/// Output of any extractor: transactions in document order plus what was learned on the way.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Extraction {
    pub transactions: Vec<Transaction>,
    pub account_info: AccountInfo,
    pub detection: DetectionResult,
    /// Soft failures that were logged and skipped.
    pub warnings: Vec<String>,
}

impl Extraction {
    /// Turn the extraction into encoder input.
    pub fn into_document(self, output_format: OutputFormat) -> StatementDocument {
        let account_info = if self.account_info.is_empty() {
            None
        } else {
            Some(self.account_info)
        };
        StatementDocument {
            transactions: self.transactions,
            account_info,
            output_format,
        }
    }
}

/// Encoder input: the contract point between extraction and camt.053 mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct StatementDocument {
    pub transactions: Vec<Transaction>,
    pub account_info: Option<AccountInfo>,
    pub output_format: OutputFormat,
}

impl StatementDocument {
    pub fn new(
        transactions: Vec<Transaction>,
        account_info: Option<AccountInfo>,
        output_format: OutputFormat,
    ) -> Self {
        Self {
            transactions,
            account_info,
            output_format,
        }
    }
}
