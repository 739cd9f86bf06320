//! CAMT.053 (ISO 20022) encoder.
//!
//! A [`StatementDocument`] is first projected onto a node tree that mirrors the camt.053
//! element hierarchy. The XML writer walks that tree in schema order; the JSON output is
//! the same tree serialized with serde, so both formats always carry the same fields.

use crate::error::{Error, Result};
use crate::types::{AccountInfo, DebitCredit, StatementDocument, Transaction};
use crate::OutputFormat;
use chrono::{NaiveDate, NaiveDateTime, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;
use tracing::warn;

/// camt.053 version 02 namespace.
pub const NAMESPACE: &str = "urn:iso:std:iso:20022:tech:xsd:camt.053.001.02";

const DEFAULT_CURRENCY: &str = "NGN";
const NOT_PROVIDED: &str = "NOTPROVIDED";
const OPENING_BOOKED: &str = "OPBD";
const CLOSING_BOOKED: &str = "CLBD";

/// Source of the processing timestamp used for message IDs and fallback dates.
pub trait Clock {
    fn now(&self) -> NaiveDateTime;
}

/// Wall-clock time in UTC.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Utc::now().naive_utc()
    }
}

/// A clock frozen at one instant, for reproducible output.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

/// Encodes statements as camt.053 XML or its JSON mirror.
#[derive(Debug, Clone, Default)]
pub struct Camt053Encoder<C: Clock = SystemClock> {
    clock: C,
}

impl Camt053Encoder<SystemClock> {
    pub fn new() -> Self {
        Self { clock: SystemClock }
    }
}

impl<C: Clock> Camt053Encoder<C> {
    /// Use a specific clock, e.g. [`FixedClock`] in tests.
    pub fn with_clock(clock: C) -> Self {
        Self { clock }
    }

    /// Encode a statement in its requested output format.
    ///
    /// # Examples
    ///
    /// ```
    /// use bankstate::camt053_format::Camt053Encoder;
    /// use bankstate::{OutputFormat, StatementDocument};
    ///
    /// let document = StatementDocument::new(vec![], None, OutputFormat::Xml);
    /// let xml = Camt053Encoder::new().encode(&document)?;
    /// assert!(xml.contains("<BkToCstmrStmt>"));
    /// # Ok::<(), bankstate::Error>(())
    /// ```
    pub fn encode(&self, document: &StatementDocument) -> Result<String> {
        match document.output_format {
            OutputFormat::Xml => {
                let mut buffer = Vec::new();
                self.write_xml(document, &mut buffer)?;
                String::from_utf8(buffer).map_err(|e| Error::Mapping(e.to_string()))
            }
            OutputFormat::Json => self.encode_json(document),
        }
    }

    /// Write camt.053 XML to any destination implementing `Write`.
    pub fn write_xml<W: Write>(&self, document: &StatementDocument, writer: W) -> Result<()> {
        let root = self.build(document)?;
        XmlWriter::new(writer).write_document(&root)
    }

    /// Serialize the JSON mirror of the camt.053 tree.
    pub fn encode_json(&self, document: &StatementDocument) -> Result<String> {
        let root = self.build(document)?;
        Ok(serde_json::to_string_pretty(&JsonRoot { document: root })?)
    }

    fn build(&self, document: &StatementDocument) -> Result<DocumentNode> {
        if let Some(index) = document.transactions.iter().position(|tx| !tx.is_balanced()) {
            return Err(Error::Mapping(format!(
                "transaction {} violates amount == credit - debit",
                index + 1
            )));
        }

        let now = self.clock.now();
        let today = now.date();
        let stamp = now.format("%Y%m%d%H%M%S").to_string();
        let created = format_date_time(&now);

        let currency = document
            .transactions
            .first()
            .map(|tx| tx.currency.clone())
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());

        let mut balances = Vec::new();
        if let Some(info) = &document.account_info {
            let period = info.statement_period;
            if let Some(amount) = info.opening_balance {
                let date = period.map(|p| p.from).unwrap_or(today);
                balances.push(BalanceNode::new(OPENING_BOOKED, amount, &currency, date));
            }
            if let Some(amount) = info.closing_balance {
                let date = period.map(|p| p.to).unwrap_or(today);
                balances.push(BalanceNode::new(CLOSING_BOOKED, amount, &currency, date));
            }
        }

        let entries = document
            .transactions
            .iter()
            .enumerate()
            .map(|(index, tx)| EntryNode::new(index, tx, today))
            .collect();

        Ok(DocumentNode {
            xmlns: NAMESPACE,
            bk_to_cstmr_stmt: BankToCustomerStatementNode {
                grp_hdr: GroupHeaderNode {
                    msg_id: format!("MSG{}", stamp),
                    cre_dt_tm: created.clone(),
                },
                stmt: StatementNode {
                    id: format!("STMT{}", stamp),
                    cre_dt_tm: created,
                    acct: document
                        .account_info
                        .as_ref()
                        .map(|info| AccountNode::new(info, &currency)),
                    bal: balances,
                    ntry: entries,
                },
            },
        })
    }
}

// Node tree shared by both output formats. Field order is element order.

#[derive(Debug, Serialize)]
struct JsonRoot {
    #[serde(rename = "Document")]
    document: DocumentNode,
}

#[derive(Debug, Serialize)]
struct DocumentNode {
    #[serde(rename = "xmlns")]
    xmlns: &'static str,
    #[serde(rename = "BkToCstmrStmt")]
    bk_to_cstmr_stmt: BankToCustomerStatementNode,
}

#[derive(Debug, Serialize)]
struct BankToCustomerStatementNode {
    #[serde(rename = "GrpHdr")]
    grp_hdr: GroupHeaderNode,
    #[serde(rename = "Stmt")]
    stmt: StatementNode,
}

#[derive(Debug, Serialize)]
struct GroupHeaderNode {
    #[serde(rename = "MsgId")]
    msg_id: String,
    #[serde(rename = "CreDtTm")]
    cre_dt_tm: String,
}

#[derive(Debug, Serialize)]
struct StatementNode {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "CreDtTm")]
    cre_dt_tm: String,
    #[serde(rename = "Acct", skip_serializing_if = "Option::is_none")]
    acct: Option<AccountNode>,
    /// Opening balance first, closing balance last. Omitted when neither is known.
    #[serde(rename = "Bal", skip_serializing_if = "Vec::is_empty")]
    bal: Vec<BalanceNode>,
    #[serde(rename = "Ntry")]
    ntry: Vec<EntryNode>,
}

#[derive(Debug, Serialize)]
struct AccountNode {
    #[serde(rename = "Id")]
    id: AccountIdNode,
    #[serde(rename = "Ccy")]
    ccy: String,
    #[serde(rename = "Ownr", skip_serializing_if = "Option::is_none")]
    ownr: Option<NameNode>,
    #[serde(rename = "Svcr", skip_serializing_if = "Option::is_none")]
    svcr: Option<ServicerNode>,
}

impl AccountNode {
    fn new(info: &AccountInfo, currency: &str) -> Self {
        Self {
            id: AccountIdNode {
                othr: OtherIdNode {
                    id: info
                        .account_number
                        .clone()
                        .unwrap_or_else(|| NOT_PROVIDED.to_string()),
                },
            },
            ccy: currency.to_string(),
            ownr: info.account_name.clone().map(|nm| NameNode { nm }),
            svcr: info.bank_name.clone().map(|nm| ServicerNode {
                fin_instn_id: NameNode { nm },
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct AccountIdNode {
    #[serde(rename = "Othr")]
    othr: OtherIdNode,
}

#[derive(Debug, Serialize)]
struct OtherIdNode {
    #[serde(rename = "Id")]
    id: String,
}

#[derive(Debug, Serialize)]
struct NameNode {
    #[serde(rename = "Nm")]
    nm: String,
}

#[derive(Debug, Serialize)]
struct ServicerNode {
    #[serde(rename = "FinInstnId")]
    fin_instn_id: NameNode,
}

#[derive(Debug, Serialize)]
struct BalanceNode {
    #[serde(rename = "Tp")]
    tp: BalanceTypeNode,
    #[serde(rename = "Amt")]
    amt: AmountNode,
    #[serde(rename = "CdtDbtInd")]
    cdt_dbt_ind: &'static str,
    #[serde(rename = "Dt")]
    dt: DateNode,
}

impl BalanceNode {
    fn new(code: &'static str, amount: Decimal, currency: &str, date: NaiveDate) -> Self {
        let indicator = if amount >= Decimal::ZERO {
            DebitCredit::Credit
        } else {
            DebitCredit::Debit
        };
        Self {
            tp: BalanceTypeNode {
                cd_or_prtry: CodeNode { cd: code },
            },
            amt: AmountNode::new(amount, currency),
            cdt_dbt_ind: indicator.to_iso_format(),
            dt: DateNode::new(date),
        }
    }
}

#[derive(Debug, Serialize)]
struct BalanceTypeNode {
    #[serde(rename = "CdOrPrtry")]
    cd_or_prtry: CodeNode,
}

#[derive(Debug, Serialize)]
struct CodeNode {
    #[serde(rename = "Cd")]
    cd: &'static str,
}

#[derive(Debug, Serialize)]
struct AmountNode {
    #[serde(rename = "Value", with = "rust_decimal::serde::float")]
    value: Decimal,
    #[serde(rename = "Ccy")]
    ccy: String,
}

impl AmountNode {
    /// Absolute value rounded to two decimals.
    fn new(amount: Decimal, currency: &str) -> Self {
        let mut value = amount.abs().round_dp(2);
        value.rescale(2);
        Self {
            value,
            ccy: currency.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DateNode {
    #[serde(rename = "Dt")]
    dt: String,
}

impl DateNode {
    fn new(date: NaiveDate) -> Self {
        Self {
            dt: format_date_only(&date),
        }
    }
}

#[derive(Debug, Serialize)]
struct EntryNode {
    #[serde(rename = "Amt")]
    amt: AmountNode,
    #[serde(rename = "CdtDbtInd")]
    cdt_dbt_ind: &'static str,
    #[serde(rename = "Sts")]
    sts: &'static str,
    #[serde(rename = "BookgDt")]
    bookg_dt: DateNode,
    #[serde(rename = "ValDt")]
    val_dt: DateNode,
    #[serde(rename = "BkTxCd")]
    bk_tx_cd: BankTransactionCodeNode,
    #[serde(rename = "NtryDtls")]
    ntry_dtls: EntryDetailsNode,
}

impl EntryNode {
    fn new(index: usize, tx: &Transaction, processing_date: NaiveDate) -> Self {
        let date = tx.date.unwrap_or_else(|| {
            warn!(
                entry = index + 1,
                %processing_date,
                "transaction has no date, booking it on the processing date"
            );
            processing_date
        });

        Self {
            amt: AmountNode::new(tx.amount, &tx.currency),
            cdt_dbt_ind: tx.debit_credit.to_iso_format(),
            sts: "BOOK",
            bookg_dt: DateNode::new(date),
            val_dt: DateNode::new(date),
            bk_tx_cd: BankTransactionCodeNode {
                domn: DomainNode {
                    cd: "PMNT",
                    fmly: FamilyNode {
                        cd: tx.debit_credit.to_family_code(),
                        sub_fmly_cd: "OTHR",
                    },
                },
            },
            ntry_dtls: EntryDetailsNode {
                tx_dtls: TransactionDetailsNode {
                    refs: ReferencesNode {
                        end_to_end_id: tx
                            .reference
                            .clone()
                            .unwrap_or_else(|| NOT_PROVIDED.to_string()),
                    },
                    addtl_tx_inf: Some(tx.description.trim().to_string()).filter(|d| !d.is_empty()),
                },
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct BankTransactionCodeNode {
    #[serde(rename = "Domn")]
    domn: DomainNode,
}

#[derive(Debug, Serialize)]
struct DomainNode {
    #[serde(rename = "Cd")]
    cd: &'static str,
    #[serde(rename = "Fmly")]
    fmly: FamilyNode,
}

#[derive(Debug, Serialize)]
struct FamilyNode {
    #[serde(rename = "Cd")]
    cd: &'static str,
    #[serde(rename = "SubFmlyCd")]
    sub_fmly_cd: &'static str,
}

#[derive(Debug, Serialize)]
struct EntryDetailsNode {
    #[serde(rename = "TxDtls")]
    tx_dtls: TransactionDetailsNode,
}

#[derive(Debug, Serialize)]
struct TransactionDetailsNode {
    #[serde(rename = "Refs")]
    refs: ReferencesNode,
    #[serde(rename = "AddtlTxInf", skip_serializing_if = "Option::is_none")]
    addtl_tx_inf: Option<String>,
}

#[derive(Debug, Serialize)]
struct ReferencesNode {
    #[serde(rename = "EndToEndId")]
    end_to_end_id: String,
}

/// Walks the node tree and emits indented XML.
struct XmlWriter<W: Write> {
    inner: Writer<W>,
}

impl<W: Write> XmlWriter<W> {
    fn new(writer: W) -> Self {
        Self {
            inner: Writer::new_with_indent(writer, b' ', 2),
        }
    }

    fn write_document(mut self, root: &DocumentNode) -> Result<()> {
        self.event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        self.event(Event::Start(
            BytesStart::new("Document").with_attributes([("xmlns", root.xmlns)]),
        ))?;
        self.start("BkToCstmrStmt")?;

        let header = &root.bk_to_cstmr_stmt.grp_hdr;
        self.start("GrpHdr")?;
        self.text("MsgId", &header.msg_id)?;
        self.text("CreDtTm", &header.cre_dt_tm)?;
        self.end("GrpHdr")?;

        let stmt = &root.bk_to_cstmr_stmt.stmt;
        self.start("Stmt")?;
        self.text("Id", &stmt.id)?;
        self.text("CreDtTm", &stmt.cre_dt_tm)?;
        if let Some(acct) = &stmt.acct {
            self.account(acct)?;
        }
        for bal in stmt.bal.iter().filter(|b| b.tp.cd_or_prtry.cd == OPENING_BOOKED) {
            self.balance(bal)?;
        }
        for entry in &stmt.ntry {
            self.entry(entry)?;
        }
        for bal in stmt.bal.iter().filter(|b| b.tp.cd_or_prtry.cd == CLOSING_BOOKED) {
            self.balance(bal)?;
        }
        self.end("Stmt")?;

        self.end("BkToCstmrStmt")?;
        self.end("Document")?;
        self.inner.get_mut().flush()?;
        Ok(())
    }

    fn account(&mut self, acct: &AccountNode) -> Result<()> {
        self.start("Acct")?;
        self.start("Id")?;
        self.start("Othr")?;
        self.text("Id", &acct.id.othr.id)?;
        self.end("Othr")?;
        self.end("Id")?;
        self.text("Ccy", &acct.ccy)?;
        if let Some(owner) = &acct.ownr {
            self.start("Ownr")?;
            self.text("Nm", &owner.nm)?;
            self.end("Ownr")?;
        }
        if let Some(servicer) = &acct.svcr {
            self.start("Svcr")?;
            self.start("FinInstnId")?;
            self.text("Nm", &servicer.fin_instn_id.nm)?;
            self.end("FinInstnId")?;
            self.end("Svcr")?;
        }
        self.end("Acct")
    }

    fn balance(&mut self, bal: &BalanceNode) -> Result<()> {
        self.start("Bal")?;
        self.start("Tp")?;
        self.start("CdOrPrtry")?;
        self.text("Cd", bal.tp.cd_or_prtry.cd)?;
        self.end("CdOrPrtry")?;
        self.end("Tp")?;
        self.amount(&bal.amt)?;
        self.text("CdtDbtInd", bal.cdt_dbt_ind)?;
        self.date("Dt", &bal.dt)?;
        self.end("Bal")
    }

    fn entry(&mut self, entry: &EntryNode) -> Result<()> {
        self.start("Ntry")?;
        self.amount(&entry.amt)?;
        self.text("CdtDbtInd", entry.cdt_dbt_ind)?;
        self.text("Sts", entry.sts)?;
        self.date("BookgDt", &entry.bookg_dt)?;
        self.date("ValDt", &entry.val_dt)?;

        let domain = &entry.bk_tx_cd.domn;
        self.start("BkTxCd")?;
        self.start("Domn")?;
        self.text("Cd", domain.cd)?;
        self.start("Fmly")?;
        self.text("Cd", domain.fmly.cd)?;
        self.text("SubFmlyCd", domain.fmly.sub_fmly_cd)?;
        self.end("Fmly")?;
        self.end("Domn")?;
        self.end("BkTxCd")?;

        let details = &entry.ntry_dtls.tx_dtls;
        self.start("NtryDtls")?;
        self.start("TxDtls")?;
        self.start("Refs")?;
        self.text("EndToEndId", &details.refs.end_to_end_id)?;
        self.end("Refs")?;
        if let Some(info) = &details.addtl_tx_inf {
            self.text("AddtlTxInf", info)?;
        }
        self.end("TxDtls")?;
        self.end("NtryDtls")?;

        self.end("Ntry")
    }

    fn amount(&mut self, amt: &AmountNode) -> Result<()> {
        self.event(Event::Start(
            BytesStart::new("Amt").with_attributes([("Ccy", amt.ccy.as_str())]),
        ))?;
        self.event(Event::Text(BytesText::new(&amt.value.to_string())))?;
        self.end("Amt")
    }

    fn date(&mut self, name: &str, date: &DateNode) -> Result<()> {
        self.start(name)?;
        self.text("Dt", &date.dt)?;
        self.end(name)
    }

    fn text(&mut self, name: &str, value: &str) -> Result<()> {
        self.start(name)?;
        self.event(Event::Text(BytesText::new(value)))?;
        self.end(name)
    }

    fn start(&mut self, name: &str) -> Result<()> {
        self.event(Event::Start(BytesStart::new(name)))
    }

    fn end(&mut self, name: &str) -> Result<()> {
        self.event(Event::End(BytesEnd::new(name)))
    }

    fn event(&mut self, event: Event<'_>) -> Result<()> {
        self.inner.write_event(event).map_err(xml_error)
    }
}

fn xml_error<E: std::fmt::Display>(err: E) -> Error {
    Error::Mapping(format!("XML write failed: {}", err))
}

fn format_date_time(date_time: &NaiveDateTime) -> String {
    date_time.format("%Y-%m-%dT%H:%M:%S").to_string()
}

fn format_date_only(date: &NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}
