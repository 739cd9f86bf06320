//! Amount and date normalization.
//!
//! Statement noise is expected, so none of these functions fail: a malformed amount is
//! zero and a malformed date is `None`.

use crate::profile::BankProfile;
use crate::types::DebitCredit;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::str::FromStr;

const CURRENCY_MARKERS: &[&str] = &["₦", "$", "€", "£", "NGN", "USD", "EUR", "GBP"];

/// Keywords that mark a single-amount line as incoming money.
const CREDIT_KEYWORDS: &[&str] = &["credit", "deposit", "transfer in"];

const FALLBACK_DATE_FORMAT: &str = "%d/%m/%Y";

/// Parse a locale-formatted amount such as `"₦12,345.67"` or `"(1,000.00)"`.
///
/// Returns `Decimal::ZERO` when what remains after cleaning is not a number.
pub fn parse_amount(raw: &str, profile: &BankProfile) -> Decimal {
    let mut text = raw.trim().to_string();

    let negative_parens = text.starts_with('(') && text.ends_with(')');
    if negative_parens {
        text = text[1..text.len() - 1].to_string();
    }

    for marker in CURRENCY_MARKERS.iter().chain(std::iter::once(&profile.currency)) {
        text = text.replace(marker, "");
    }

    let cleaned: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && *c != profile.thousands_separator)
        .map(|c| if c == profile.decimal_separator { '.' } else { c })
        .collect();

    match Decimal::from_str(&cleaned) {
        Ok(value) if negative_parens => -value.abs(),
        Ok(value) => value,
        Err(_) => Decimal::ZERO,
    }
}

/// Parse a date using the profile's formats in order, then the separator fallback.
pub fn parse_date(raw: &str, profile: &BankProfile) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    profile
        .date_formats
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
        .or_else(|| {
            let swapped = raw.replace('-', "/");
            NaiveDate::parse_from_str(&swapped, FALLBACK_DATE_FORMAT).ok()
        })
}

/// Whether a description reads like incoming money.
pub fn has_credit_keyword(description: &str) -> bool {
    let lower = description.to_lowercase();
    CREDIT_KEYWORDS.iter().any(|keyword| lower.contains(keyword))
}

/// Classify a lone amount as `(debit, credit, kind)`.
///
/// Credit when the description carries a credit keyword, debit otherwise. A zero amount
/// with no keyword therefore comes out as a debit; that is a policy default.
pub fn classify_single_amount(
    amount: Decimal,
    description: &str,
) -> (Decimal, Decimal, DebitCredit) {
    let amount = amount.abs();
    if has_credit_keyword(description) {
        (Decimal::ZERO, amount, DebitCredit::Credit)
    } else {
        (amount, Decimal::ZERO, DebitCredit::Debit)
    }
}

/// Resolve side-by-side debit/credit values into `(debit, credit, kind)`.
pub fn split_debit_credit(debit: Decimal, credit: Decimal) -> (Decimal, Decimal, DebitCredit) {
    let debit = debit.abs();
    let credit = credit.abs();
    let kind = if credit > Decimal::ZERO {
        DebitCredit::Credit
    } else {
        DebitCredit::Debit
    };
    (debit, credit, kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::Bank;
    use chrono::Datelike;

    #[test]
    fn test_parse_amount() {
        let profile = Bank::Gtbank.profile();
        assert_eq!(parse_amount("₦12,345.67", profile), Decimal::new(1234567, 2));
        assert_eq!(parse_amount("NGN 1,000", profile), Decimal::new(1000, 0));
        assert_eq!(parse_amount("-250.50", profile), Decimal::new(-25050, 2));
        assert_eq!(parse_amount("(1,000.00)", profile), Decimal::new(-100000, 2));
    }

    #[test]
    fn test_parse_amount_noise_is_zero() {
        let profile = Bank::Unknown.profile();
        assert_eq!(parse_amount("abc", profile), Decimal::ZERO);
        assert_eq!(parse_amount("", profile), Decimal::ZERO);
        assert_eq!(parse_amount("--", profile), Decimal::ZERO);
    }

    #[test]
    fn test_parse_date_profile_order() {
        let date = parse_date("20/02/2024", Bank::Gtbank.profile()).unwrap();
        assert_eq!((date.year(), date.month(), date.day()), (2024, 2, 20));

        let date = parse_date("15-Mar-2024", Bank::AccessBank.profile()).unwrap();
        assert_eq!((date.year(), date.month(), date.day()), (2024, 3, 15));
    }

    #[test]
    fn test_parse_date_separator_fallback() {
        // UBA has no dashed day-first format.
        let date = parse_date("05-01-2025", Bank::Uba.profile()).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2025, 1, 5).unwrap());
    }

    #[test]
    fn test_parse_date_garbage() {
        assert_eq!(parse_date("Opening Balance", Bank::Gtbank.profile()), None);
        assert_eq!(parse_date("   ", Bank::Gtbank.profile()), None);
    }

    #[test]
    fn test_classify_single_amount() {
        let (debit, credit, kind) = classify_single_amount(Decimal::new(500, 0), "CASH DEPOSIT");
        assert_eq!(
            (debit, credit, kind),
            (Decimal::ZERO, Decimal::new(500, 0), DebitCredit::Credit)
        );

        let (debit, credit, kind) = classify_single_amount(Decimal::new(500, 0), "POS PURCHASE");
        assert_eq!(
            (debit, credit, kind),
            (Decimal::new(500, 0), Decimal::ZERO, DebitCredit::Debit)
        );

        let (_, _, kind) = classify_single_amount(Decimal::ZERO, "SMS ALERT");
        assert_eq!(kind, DebitCredit::Debit);
    }

    #[test]
    fn test_split_debit_credit() {
        let (_, _, kind) = split_debit_credit(Decimal::ZERO, Decimal::new(2000, 0));
        assert_eq!(kind, DebitCredit::Credit);
        let (debit, _, kind) = split_debit_credit(Decimal::new(-1000, 0), Decimal::ZERO);
        assert_eq!((debit, kind), (Decimal::new(1000, 0), DebitCredit::Debit));
    }
}
