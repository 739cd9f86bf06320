//! External OCR provider: HTTP client and response normalization.
//!
//! Providers disagree on field names, so every canonical field is resolved through an
//! ordered alias list and the first non-null value wins.

use crate::config::ExternalConfig;
use crate::detector::{self, DetectionResult, FileType};
use crate::error::{Error, Result};
use crate::normalizer::{classify_single_amount, parse_amount, parse_date, split_debit_credit};
use crate::profile::{Bank, BankProfile};
use crate::types::{AccountInfo, DebitCredit, Extraction, StatementPeriod, Transaction};
use chrono::NaiveDate;
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::Client;
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::str::FromStr;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Provider path, relative to the configured base URL.
pub const EXTRACT_PATH: &str = "/bank-statements/extract";

/// Base delay for exponential backoff (milliseconds)
const RETRY_BASE_DELAY_MS: u64 = 500;

/// Upper bound for a single backoff delay (milliseconds)
const RETRY_MAX_DELAY_MS: u64 = 10_000;

const ISO_DATE: &str = "%Y-%m-%d";

const LIST_KEYS: &[&str] = &["transactions", "data"];

const DATE_KEYS: &[&str] = &["date", "transaction_date", "value_date", "posting_date"];
const DESCRIPTION_KEYS: &[&str] = &["description", "narration", "details", "memo"];
const DEBIT_KEYS: &[&str] = &["debit", "withdrawal", "debit_amount"];
const CREDIT_KEYS: &[&str] = &["credit", "deposit", "credit_amount"];
const AMOUNT_KEYS: &[&str] = &["amount"];
const TYPE_KEYS: &[&str] = &["type"];
const BALANCE_KEYS: &[&str] = &["balance", "running_balance"];
const REFERENCE_KEYS: &[&str] = &["reference", "ref", "transaction_id"];
const CURRENCY_KEYS: &[&str] = &["currency"];

const ACCOUNT_SCOPES: &[&str] = &["account", "account_info"];
const ACCOUNT_NUMBER_KEYS: &[&str] = &["account_number", "accountNumber", "account_no"];
const ACCOUNT_NAME_KEYS: &[&str] = &["account_name", "accountName", "account_holder"];
const BANK_NAME_KEYS: &[&str] = &["bank_name", "bankName", "bank"];
const OPENING_BALANCE_KEYS: &[&str] = &["opening_balance", "openingBalance"];
const CLOSING_BALANCE_KEYS: &[&str] = &["closing_balance", "closingBalance"];
const PERIOD_FROM_KEYS: &[&str] = &["period_from", "start_date", "from"];
const PERIOD_TO_KEYS: &[&str] = &["period_to", "end_date", "to"];

/// Blocking client for the provider's extraction endpoint.
#[derive(Debug, Clone)]
pub struct ExternalExtractor {
    client: Client,
    endpoint: String,
    api_key: String,
    max_retries: u32,
}

impl ExternalExtractor {
    /// Build a client from configuration. Fails with `Validation` when no API key is set.
    pub fn new(config: &ExternalConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                Error::Validation(
                    "external mode requires an API key (BANKSTATE_API_KEY)".to_string(),
                )
            })?;

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::fatal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}{}", config.base_url.trim_end_matches('/'), EXTRACT_PATH),
            api_key,
            max_retries: config.max_retries,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Upload a document and normalize the provider's answer.
    pub fn extract(
        &self,
        bytes: &[u8],
        filename: &str,
        profile: &BankProfile,
    ) -> Result<Extraction> {
        let payload = self.fetch(bytes, filename)?;
        normalize_response(&payload, profile, FileType::from_filename(filename))
    }

    /// Upload a document and return the raw JSON payload, retrying transient failures.
    pub fn fetch(&self, bytes: &[u8], filename: &str) -> Result<Value> {
        let mut attempt = 0;
        loop {
            match self.send(bytes, filename) {
                Ok(payload) => return Ok(payload),
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    let delay = backoff_delay(attempt);
                    warn!(
                        filename,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "external extraction failed, retrying: {}",
                        err
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn send(&self, bytes: &[u8], filename: &str) -> Result<Value> {
        let part = Part::bytes(bytes.to_vec()).file_name(filename.to_string());
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(classify_status(status.as_u16(), &body));
        }

        let body = response.text().map_err(classify_transport)?;
        let payload: Value = serde_json::from_str(&body)
            .map_err(|e| Error::fatal(format!("malformed provider response: {}", e)))?;
        debug!(filename, status = status.as_u16(), "provider responded");
        Ok(payload)
    }
}

/// Exponential backoff: 500 ms, 1 s, 2 s, ... capped at 10 s.
pub fn backoff_delay(attempt: u32) -> Duration {
    let delay_ms = RETRY_BASE_DELAY_MS.saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis(delay_ms.min(RETRY_MAX_DELAY_MS))
}

/// Map a non-2xx provider status to an integration error.
pub fn classify_status(status: u16, body: &str) -> Error {
    match status {
        429 => Error::retryable("provider rate limit exceeded (HTTP 429)"),
        500..=599 => Error::retryable(format!("provider unavailable (HTTP {})", status)),
        _ => {
            let detail: String = body.trim().chars().take(200).collect();
            if detail.is_empty() {
                Error::fatal(format!("provider rejected the request (HTTP {})", status))
            } else {
                Error::fatal(format!("provider rejected the request (HTTP {}): {}", status, detail))
            }
        }
    }
}

fn classify_transport(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::retryable("provider request timed out")
    } else if err.is_connect() {
        Error::retryable(format!("could not connect to provider: {}", err))
    } else {
        Error::fatal(format!("provider request failed: {}", err))
    }
}

/// Normalize a provider payload into an [`Extraction`].
///
/// The bank is detected from the payload's bank name; when the caller's profile is the
/// unknown one, the detected bank's profile is used for string amounts and dates.
pub fn normalize_response(
    payload: &Value,
    profile: &BankProfile,
    file_type: FileType,
) -> Result<Extraction> {
    if let Some(message) = payload.get("error").and_then(text) {
        return Err(Error::fatal(format!("provider reported an error: {}", message)));
    }

    let items = transaction_list(payload)
        .ok_or_else(|| Error::fatal("malformed provider response: no transactions list"))?;

    let scopes = account_scopes(payload);
    let bank_name = lookup_in(&scopes, BANK_NAME_KEYS).and_then(text);
    let (bank, confidence) = bank_name
        .as_deref()
        .map(detector::match_bank_patterns)
        .unwrap_or((Bank::Unknown, 0.0));

    let profile = if profile.bank == Bank::Unknown {
        bank.profile()
    } else {
        profile
    };

    let mut transactions = Vec::with_capacity(items.len());
    let mut warnings = Vec::new();
    for (index, item) in items.iter().enumerate() {
        match parse_transaction(item, profile) {
            Ok(transaction) => transactions.push(transaction),
            Err(message) => {
                warn!(record = index + 1, "skipping provider record: {}", message);
                warnings.push(format!("record {}: {}", index + 1, message));
            }
        }
    }

    let account_info = scan_account(&scopes, bank_name, profile);

    debug!(
        %bank,
        transactions = transactions.len(),
        skipped = warnings.len(),
        "normalized provider payload"
    );

    Ok(Extraction {
        transactions,
        account_info,
        detection: DetectionResult {
            bank,
            confidence,
            rows: Some(items.len()),
            ..DetectionResult::unknown(file_type)
        },
        warnings,
    })
}

fn transaction_list(payload: &Value) -> Option<&Vec<Value>> {
    LIST_KEYS.iter().find_map(|key| match payload.get(key)? {
        Value::Array(items) => Some(items),
        nested @ Value::Object(_) => nested.get("transactions")?.as_array(),
        _ => None,
    })
}

/// Parse one provider record. Records without any monetary field are rejected.
pub fn parse_transaction(
    item: &Value,
    profile: &BankProfile,
) -> std::result::Result<Transaction, String> {
    let record = item.as_object().ok_or_else(|| "record is not an object".to_string())?;

    let date = lookup(record, DATE_KEYS).and_then(|v| date_value(v, profile));
    let description = lookup(record, DESCRIPTION_KEYS).and_then(text).unwrap_or_default();

    let debit = lookup(record, DEBIT_KEYS).and_then(|v| decimal_value(v, profile));
    let credit = lookup(record, CREDIT_KEYS).and_then(|v| decimal_value(v, profile));

    let (debit, credit, kind) = if debit.is_some() || credit.is_some() {
        split_debit_credit(debit.unwrap_or_default(), credit.unwrap_or_default())
    } else {
        let amount = lookup(record, AMOUNT_KEYS)
            .and_then(|v| decimal_value(v, profile))
            .ok_or_else(|| "record has no debit, credit or amount".to_string())?;
        let declared = lookup(record, TYPE_KEYS)
            .and_then(text)
            .and_then(|t| DebitCredit::from_str(&t).ok());
        match declared {
            Some(DebitCredit::Credit) => (Decimal::ZERO, amount.abs(), DebitCredit::Credit),
            Some(DebitCredit::Debit) => (amount.abs(), Decimal::ZERO, DebitCredit::Debit),
            None if amount < Decimal::ZERO => (amount.abs(), Decimal::ZERO, DebitCredit::Debit),
            None => classify_single_amount(amount, &description),
        }
    };

    let currency = lookup(record, CURRENCY_KEYS)
        .and_then(text)
        .map(|c| c.to_uppercase())
        .unwrap_or_else(|| profile.currency.to_string());

    Ok(Transaction::new(date, description, debit, credit, kind, currency)
        .with_balance(lookup(record, BALANCE_KEYS).and_then(|v| decimal_value(v, profile)))
        .with_reference(lookup(record, REFERENCE_KEYS).and_then(text)))
}

fn account_scopes(payload: &Value) -> Vec<&Map<String, Value>> {
    ACCOUNT_SCOPES
        .iter()
        .filter_map(|key| payload.get(key).and_then(Value::as_object))
        .chain(payload.as_object())
        .collect()
}

fn scan_account(
    scopes: &[&Map<String, Value>],
    bank_name: Option<String>,
    profile: &BankProfile,
) -> AccountInfo {
    let date = |keys: &[&str]| lookup_in(scopes, keys).and_then(|v| date_value(v, profile));
    let amount = |keys: &[&str]| lookup_in(scopes, keys).and_then(|v| decimal_value(v, profile));

    let statement_period = match (date(PERIOD_FROM_KEYS), date(PERIOD_TO_KEYS)) {
        (Some(from), Some(to)) => Some(StatementPeriod { from, to }),
        _ => None,
    };

    AccountInfo {
        account_number: lookup_in(scopes, ACCOUNT_NUMBER_KEYS).and_then(text),
        account_name: lookup_in(scopes, ACCOUNT_NAME_KEYS).and_then(text),
        bank_name,
        statement_period,
        opening_balance: amount(OPENING_BALANCE_KEYS),
        closing_balance: amount(CLOSING_BALANCE_KEYS),
    }
}

fn lookup<'a>(record: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| record.get(*key))
        .find(|value| !value.is_null())
}

fn lookup_in<'a>(scopes: &[&'a Map<String, Value>], keys: &[&str]) -> Option<&'a Value> {
    scopes.iter().find_map(|scope| lookup(scope, keys))
}

/// Strings and numbers as trimmed text; anything else or blank is `None`.
fn text(value: &Value) -> Option<String> {
    let raw = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!raw.is_empty()).then_some(raw)
}

fn decimal_value(value: &Value, profile: &BankProfile) -> Option<Decimal> {
    match value {
        Value::Number(n) => {
            let raw = n.to_string();
            Decimal::from_str(&raw)
                .or_else(|_| Decimal::from_scientific(&raw))
                .ok()
        }
        Value::String(s) if !s.trim().is_empty() => Some(parse_amount(s, profile)),
        _ => None,
    }
}

/// Dates as strings. Timestamps are cut to their date part and ISO dates are always accepted.
fn date_value(value: &Value, profile: &BankProfile) -> Option<NaiveDate> {
    let raw = value.as_str()?.trim();
    let day = raw.split_once('T').map_or(raw, |(day, _)| day);
    parse_date(day, profile).or_else(|| NaiveDate::parse_from_str(day, ISO_DATE).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn unknown() -> &'static BankProfile {
        BankProfile::default_profile()
    }

    #[test]
    fn test_normalize_transactions_key() {
        let payload = json!({
            "bank_name": "Zenith Bank Plc",
            "account_number": "0123456789",
            "transactions": [
                {
                    "date": "2025-11-01",
                    "description": "POS",
                    "debit": 1500.5,
                    "balance": "8,499.50"
                },
                {
                    "transaction_date": "02/11/2025",
                    "narration": "SALARY",
                    "credit": "9,000.00",
                    "ref": "TX-2"
                }
            ]
        });
        let extraction = normalize_response(&payload, unknown(), FileType::Pdf).unwrap();

        assert_eq!(extraction.detection.bank, Bank::ZenithBank);
        assert_eq!(extraction.detection.file_type, FileType::Pdf);
        assert_eq!(extraction.account_info.account_number.as_deref(), Some("0123456789"));

        let txs = &extraction.transactions;
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].date, NaiveDate::from_ymd_opt(2025, 11, 1));
        assert_eq!(txs[0].amount, Decimal::new(-15005, 1));
        assert_eq!(txs[0].balance, Some(Decimal::new(849950, 2)));
        assert_eq!(txs[1].debit_credit, DebitCredit::Credit);
        assert_eq!(txs[1].date, NaiveDate::from_ymd_opt(2025, 11, 2));
        assert_eq!(txs[1].reference.as_deref(), Some("TX-2"));
        assert!(txs.iter().all(Transaction::is_balanced));
    }

    #[test]
    fn test_normalize_nested_data_and_account_scope() {
        let payload = json!({
            "data": {
                "transactions": [
                    {"value_date": "2025-11-03T00:00:00Z", "memo": "Fee", "amount": "-50"}
                ]
            },
            "account": {
                "accountName": "ADA OBI",
                "bank": "GTBank",
                "start_date": "01/11/2025",
                "end_date": "30/11/2025",
                "openingBalance": 100
            }
        });
        let extraction = normalize_response(&payload, unknown(), FileType::Pdf).unwrap();
        let info = &extraction.account_info;
        assert_eq!(info.account_name.as_deref(), Some("ADA OBI"));
        assert_eq!(info.bank_name.as_deref(), Some("GTBank"));
        assert_eq!(info.opening_balance, Some(Decimal::new(100, 0)));
        assert!(info.statement_period.is_some());

        let tx = &extraction.transactions[0];
        assert_eq!(tx.date, NaiveDate::from_ymd_opt(2025, 11, 3));
        assert_eq!(tx.debit_credit, DebitCredit::Debit);
        assert_eq!(tx.amount, Decimal::new(-50, 0));
    }

    #[test]
    fn test_sign_policy() {
        let profile = unknown();
        let typed = parse_transaction(&json!({"amount": 200, "type": "CR"}), profile).unwrap();
        assert_eq!(typed.debit_credit, DebitCredit::Credit);
        assert_eq!(typed.amount, Decimal::new(200, 0));

        let typed_debit =
            parse_transaction(&json!({"amount": 200, "type": "debit"}), profile).unwrap();
        assert_eq!(typed_debit.amount, Decimal::new(-200, 0));

        let item = json!({"amount": 75, "description": "Cash deposit"});
        let keyword = parse_transaction(&item, profile).unwrap();
        assert_eq!(keyword.debit_credit, DebitCredit::Credit);

        let item = json!({"amount": 75, "description": "Airtime"});
        let plain = parse_transaction(&item, profile).unwrap();
        assert_eq!(plain.debit_credit, DebitCredit::Debit);

        // Explicit sides win over amount and type.
        let item = json!({"withdrawal": 10, "amount": 999, "type": "credit"});
        let sides = parse_transaction(&item, profile).unwrap();
        assert_eq!(sides.debit, Decimal::new(10, 0));
        assert_eq!(sides.debit_credit, DebitCredit::Debit);
    }

    #[test]
    fn test_missing_date_and_amount() {
        let undated = parse_transaction(&json!({"date": "soon", "amount": 5}), unknown()).unwrap();
        assert_eq!(undated.date, None);

        let payload = json!({"transactions": [{"description": "no money"}, "junk"]});
        let extraction = normalize_response(&payload, unknown(), FileType::Pdf).unwrap();
        assert!(extraction.transactions.is_empty());
        assert_eq!(extraction.warnings.len(), 2);
    }

    #[test]
    fn test_malformed_payloads() {
        let err = normalize_response(&json!({"result": []}), unknown(), FileType::Pdf).unwrap_err();
        assert!(matches!(err, Error::Integration { retryable: false, .. }));

        let payload = json!({"error": "quota exhausted"});
        let err = normalize_response(&payload, unknown(), FileType::Pdf).unwrap_err();
        assert!(err.to_string().contains("quota exhausted"));
    }

    #[test]
    fn test_classify_status() {
        assert!(classify_status(503, "").is_retryable());
        assert!(classify_status(429, "").is_retryable());
        assert!(!classify_status(401, "bad key").is_retryable());
        assert!(!classify_status(404, "").is_retryable());
    }

    #[test]
    fn test_backoff_delay() {
        assert_eq!(backoff_delay(0), Duration::from_millis(500));
        assert_eq!(backoff_delay(1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(10), Duration::from_millis(RETRY_MAX_DELAY_MS));
    }

    #[test]
    fn test_missing_api_key() {
        let err = ExternalExtractor::new(&ExternalConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    /// Serve every connection with `respond`, recording the raw requests.
    fn serve<F>(respond: F) -> (String, Arc<AtomicUsize>, Arc<Mutex<Vec<String>>>)
    where
        F: Fn(&mut TcpStream) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let (hits_seen, requests_seen) = (hits.clone(), requests.clone());
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                hits_seen.fetch_add(1, Ordering::SeqCst);
                stream.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
                let mut raw = Vec::new();
                let mut buf = [0u8; 4096];
                while let Ok(n) = stream.read(&mut buf) {
                    if n == 0 {
                        break;
                    }
                    raw.extend_from_slice(&buf[..n]);
                }
                requests_seen.lock().unwrap().push(String::from_utf8_lossy(&raw).into_owned());
                respond(&mut stream);
            }
        });

        (base_url, hits, requests)
    }

    fn reply(status: &str, body: &str) -> impl Fn(&mut TcpStream) + Send + 'static {
        let response = format!(
            concat!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\n",
                "Content-Length: {}\r\nConnection: close\r\n\r\n{}",
            ),
            status,
            body.len(),
            body
        );
        move |stream: &mut TcpStream| {
            let _ = stream.write_all(response.as_bytes());
        }
    }

    fn extractor(base_url: String, timeout: Duration, max_retries: u32) -> ExternalExtractor {
        ExternalExtractor::new(&ExternalConfig {
            base_url,
            api_key: Some("test-key".into()),
            timeout,
            max_retries,
        })
        .unwrap()
    }

    #[test]
    fn test_successful_upload() {
        let body = r#"{"transactions":[{"date":"01/11/2025","description":"POS","amount":-20}]}"#;
        let (base_url, hits, requests) = serve(reply("200 OK", body));

        let extraction = extractor(base_url, Duration::from_secs(5), 0)
            .extract(b"%PDF-1.4", "statement.pdf", unknown())
            .unwrap();

        assert_eq!(extraction.transactions.len(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        let request = requests.lock().unwrap()[0].to_lowercase();
        assert!(request.starts_with("post /bank-statements/extract"));
        assert!(request.contains("authorization: bearer test-key"));
        assert!(request.contains("name=\"file\""));
    }

    #[test]
    fn test_server_error_is_retried_then_surfaces() {
        let (base_url, hits, _) = serve(reply("503 Service Unavailable", ""));
        let err = extractor(base_url, Duration::from_secs(5), 1)
            .fetch(b"data", "statement.pdf")
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_client_error_is_not_retried() {
        let (base_url, hits, _) = serve(reply("401 Unauthorized", r#"{"message":"bad key"}"#));
        let err = extractor(base_url, Duration::from_secs(5), 3)
            .fetch(b"data", "statement.pdf")
            .unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("401"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_timeout_is_retryable() {
        let (base_url, _, _) =
            serve(|_stream: &mut TcpStream| thread::sleep(Duration::from_secs(2)));
        let err = extractor(base_url, Duration::from_millis(300), 0)
            .fetch(b"data", "statement.pdf")
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_connection_refused_is_retryable() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let err = extractor(base_url, Duration::from_secs(2), 0)
            .fetch(b"data", "statement.pdf")
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
