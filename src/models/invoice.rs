use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROVIDER_HOLDED: &str = "holded";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateCode {
    Open,
    PendingReview,
}

impl StateCode {
    pub fn from_review(needs_review: bool) -> Self {
        if needs_review {
            Self::PendingReview
        } else {
            Self::Open
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::PendingReview => "PENDING_REVIEW",
        }
    }
}

impl fmt::Display for StateCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StateCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(Self::Open),
            "PENDING_REVIEW" => Ok(Self::PendingReview),
            other => Err(format!("unknown state_code {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineType {
    Sale,
    Promotion,
}

impl LineType {
    /// Zero-unit lines are free goods.
    pub fn from_units(units: i64) -> Self {
        if units > 0 {
            Self::Sale
        } else {
            Self::Promotion
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sale => "sale",
            Self::Promotion => "promotion",
        }
    }
}

impl FromStr for LineType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sale" => Ok(Self::Sale),
            "promotion" => Ok(Self::Promotion),
            other => Err(format!("unknown line_type {other:?}")),
        }
    }
}

/// What the upstream actually returned, kept for replay without re-calling it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub provider: String,
    pub external_id: String,
    pub currency_raw: Option<String>,
    pub doc_number_raw: Option<Value>,
    pub date_unix: Option<Value>,
    #[serde(default)]
    pub detail_keys: Vec<String>,
    pub contact_id_candidate: Option<String>,
    pub client_name_source: Option<String>,
    /// Upstream ids this invoice was previously known under, oldest first.
    #[serde(default)]
    pub superseded_external_ids: Vec<String>,
    #[serde(default)]
    pub raw: BTreeMap<String, Value>,
}

/// Invoice header as derived from one upstream document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    pub source_provider: String,
    pub external_invoice_id: String,
    pub invoice_number: String,
    pub invoice_date: NaiveDate,
    pub currency: Option<String>,
    pub total_net: BigDecimal,
    pub total_vat: BigDecimal,
    pub total_gross: BigDecimal,
    pub source_month: String,
    pub state_code: StateCode,
    pub needs_review: bool,
    pub client_name: Option<String>,
    pub external_modified_at: Option<DateTime<Utc>>,
    pub source_meta: Provenance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredInvoice {
    pub id: i64,
    pub record: InvoiceRecord,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceItemRecord {
    pub description: String,
    pub units: i64,
    pub unit_net_price: BigDecimal,
    pub line_net_amount: BigDecimal,
    pub vat_rate: BigDecimal,
    pub line_vat_amount: BigDecimal,
    pub line_gross_amount: BigDecimal,
    pub line_type: LineType,
    pub state_code: StateCode,
}

impl InvoiceItemRecord {
    /// Build a line with the derived amounts: net = units × price,
    /// vat = net × rate / 100, gross = net + vat.
    pub fn compute(
        description: String,
        units: i64,
        unit_net_price: BigDecimal,
        vat_rate: BigDecimal,
        state_code: StateCode,
    ) -> Self {
        let line_net_amount = BigDecimal::from(units) * &unit_net_price;
        let line_vat_amount = &line_net_amount * &vat_rate / BigDecimal::from(100);
        let line_gross_amount = &line_net_amount + &line_vat_amount;
        Self {
            description,
            units,
            unit_net_price,
            line_net_amount,
            vat_rate,
            line_vat_amount,
            line_gross_amount,
            line_type: LineType::from_units(units),
            state_code,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredInvoiceItem {
    pub id: i64,
    pub invoice_id: i64,
    pub item: InvoiceItemRecord,
}
