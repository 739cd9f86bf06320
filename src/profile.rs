//! Known banks and their statement conventions.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Banks whose statements the detector can recognise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bank {
    Gtbank,
    AccessBank,
    ZenithBank,
    Uba,
    FirstBank,
    StanbicIbtc,
    FidelityBank,
    UnionBank,
    Unknown,
}

impl Bank {
    /// Every known bank in declaration order. Detector ties go to the earlier entry.
    pub const KNOWN: [Bank; 8] = [
        Bank::Gtbank,
        Bank::AccessBank,
        Bank::ZenithBank,
        Bank::Uba,
        Bank::FirstBank,
        Bank::StanbicIbtc,
        Bank::FidelityBank,
        Bank::UnionBank,
    ];

    /// Stable identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Bank::Gtbank => "gtbank",
            Bank::AccessBank => "access_bank",
            Bank::ZenithBank => "zenith_bank",
            Bank::Uba => "uba",
            Bank::FirstBank => "first_bank",
            Bank::StanbicIbtc => "stanbic_ibtc",
            Bank::FidelityBank => "fidelity_bank",
            Bank::UnionBank => "union_bank",
            Bank::Unknown => "unknown",
        }
    }

    /// Profile for this bank.
    pub fn profile(&self) -> &'static BankProfile {
        BankProfile::lookup(*self)
    }
}

impl fmt::Display for Bank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Bank {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s.trim().to_lowercase();
        Bank::KNOWN
            .iter()
            .chain(std::iter::once(&Bank::Unknown))
            .find(|bank| bank.as_str() == id)
            .copied()
            .ok_or_else(|| Error::Validation(format!("Unknown bank identifier: {}", s)))
    }
}

/// Per-bank configuration of date formats, currency and separators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankProfile {
    pub bank: Bank,
    pub name: &'static str,
    /// chrono format strings, tried in order.
    pub date_formats: &'static [&'static str],
    pub currency: &'static str,
    pub decimal_separator: char,
    pub thousands_separator: char,
}

const DEFAULT_DATE_FORMATS: &[&str] = &["%d/%m/%Y", "%Y-%m-%d", "%d-%b-%Y"];

const fn ngn(bank: Bank, name: &'static str, date_formats: &'static [&'static str]) -> BankProfile {
    BankProfile {
        bank,
        name,
        date_formats,
        currency: "NGN",
        decimal_separator: '.',
        thousands_separator: ',',
    }
}

static PROFILES: [BankProfile; 9] = [
    ngn(Bank::Gtbank, "GTBank (Guaranty Trust Bank)", &["%d/%m/%Y", "%d-%m-%Y", "%Y-%m-%d"]),
    ngn(Bank::AccessBank, "Access Bank", &["%d/%m/%Y", "%d-%b-%Y"]),
    ngn(Bank::ZenithBank, "Zenith Bank", &["%d/%m/%Y", "%d-%m-%Y"]),
    ngn(Bank::Uba, "United Bank for Africa (UBA)", &["%d/%m/%Y", "%Y-%m-%d"]),
    ngn(Bank::FirstBank, "First Bank of Nigeria", DEFAULT_DATE_FORMATS),
    ngn(Bank::StanbicIbtc, "Stanbic IBTC Bank", DEFAULT_DATE_FORMATS),
    ngn(Bank::FidelityBank, "Fidelity Bank", DEFAULT_DATE_FORMATS),
    ngn(Bank::UnionBank, "Union Bank of Nigeria", DEFAULT_DATE_FORMATS),
    ngn(Bank::Unknown, "Unknown Bank", DEFAULT_DATE_FORMATS),
];

impl BankProfile {
    /// Look up the profile for a bank; always succeeds.
    pub fn lookup(bank: Bank) -> &'static BankProfile {
        PROFILES
            .iter()
            .find(|p| p.bank == bank)
            .unwrap_or(&PROFILES[PROFILES.len() - 1])
    }

    /// Display name, or `None` for the unknown-bank profile.
    pub fn known_name(&self) -> Option<&'static str> {
        (self.bank != Bank::Unknown).then_some(self.name)
    }

    /// Profile used when the bank could not be identified.
    pub fn default_profile() -> &'static BankProfile {
        Self::lookup(Bank::Unknown)
    }
}
