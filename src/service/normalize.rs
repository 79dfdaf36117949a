use std::str::FromStr;

use bigdecimal::{BigDecimal, Zero};
use chrono::NaiveDate;

use crate::holded::models::ProductLine;
use crate::models::{InvoiceItemRecord, StateCode};

const NO_DESCRIPTION: &str = "(no description)";

/// A line that cannot be stored as-is.
#[derive(Debug, Clone, PartialEq)]
pub enum LineRejection {
    Negative { index: usize, units: f64 },
    Fractional { index: usize, units: f64 },
}

/// Map a raw upstream currency onto the accepted set, case-insensitively.
/// Returns the canonical code, or `None` when the document needs review.
pub fn normalize_currency(raw: Option<&str>, accepted: &[String]) -> Option<String> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty())?;
    accepted
        .iter()
        .find(|code| code.eq_ignore_ascii_case(raw))
        .map(|code| code.to_ascii_uppercase())
}

/// Decimal from an upstream float, going through its shortest text form so
/// `10.1` stays `10.1` instead of the binary expansion.
pub fn decimal_from_f64(value: f64) -> BigDecimal {
    if !value.is_finite() {
        return BigDecimal::zero();
    }
    BigDecimal::from_str(&value.to_string()).unwrap_or_else(|_| BigDecimal::zero())
}

pub fn source_month(date: NaiveDate) -> String {
    date.format("%Y-%m").to_string()
}

/// Build every line item, or reject the whole set on the first bad line.
pub fn build_items(
    products: &[ProductLine],
    state_code: StateCode,
) -> Result<Vec<InvoiceItemRecord>, LineRejection> {
    let mut items = Vec::with_capacity(products.len());
    for (index, p) in products.iter().enumerate() {
        let units = p.units.unwrap_or(0.0);
        if units < 0.0 {
            return Err(LineRejection::Negative { index, units });
        }
        if units.fract() != 0.0 || units > i64::MAX as f64 {
            return Err(LineRejection::Fractional { index, units });
        }

        let description = p
            .description
            .clone()
            .or_else(|| p.name.clone())
            .unwrap_or_else(|| NO_DESCRIPTION.to_string());

        items.push(InvoiceItemRecord::compute(
            description,
            units as i64,
            decimal_from_f64(p.price.unwrap_or(0.0)),
            decimal_from_f64(p.tax.unwrap_or(0.0)),
            state_code,
        ));
    }
    Ok(items)
}
