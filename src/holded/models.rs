use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::{Map, Value};

/// Upstream fields kept verbatim in the invoice provenance.
pub const EVIDENCE_FIELDS: &[&str] = &[
    "contact",
    "contactId",
    "contactName",
    "client",
    "customer",
    "status",
    "draft",
    "updatedAt",
    "modifiedAt",
];

/// Document detail as returned by `GET /documents/{docType}/{id}`.
///
/// Holded payloads are loosely typed (numbers arrive as strings now and then),
/// so fields are read through lenient accessors instead of a strict schema.
#[derive(Debug, Clone)]
pub struct DocumentDetail {
    raw: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProductLine {
    pub name: Option<String>,
    pub description: Option<String>,
    pub units: Option<f64>,
    pub price: Option<f64>,
    /// VAT rate in percent.
    pub tax: Option<f64>,
}

impl TryFrom<Value> for DocumentDetail {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(raw) => Ok(Self { raw }),
            other => Err(format!(
                "document detail is not a JSON object (got {})",
                json_kind(&other)
            )),
        }
    }
}

impl DocumentDetail {
    pub fn raw(&self) -> &Map<String, Value> {
        &self.raw
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.raw.get(key).filter(|v| !v.is_null())
    }

    /// Trimmed, non-empty document number.
    pub fn doc_number(&self) -> Option<String> {
        self.field("docNumber").and_then(text_value)
    }

    pub fn date_unix(&self) -> Option<f64> {
        self.field("date").and_then(number_value)
    }

    pub fn currency_raw(&self) -> Option<String> {
        self.field("currency").and_then(text_value)
    }

    pub fn subtotal(&self) -> Option<f64> {
        self.field("subtotal").and_then(number_value)
    }

    pub fn tax(&self) -> Option<f64> {
        self.field("tax").and_then(number_value)
    }

    pub fn total(&self) -> Option<f64> {
        self.field("total").and_then(number_value)
    }

    pub fn products(&self) -> Vec<ProductLine> {
        let Some(Value::Array(items)) = self.field("products") else {
            return Vec::new();
        };
        items
            .iter()
            .map(|p| ProductLine {
                name: p.get("name").and_then(text_value),
                description: p.get("description").and_then(text_value),
                units: p.get("units").and_then(number_value),
                price: p.get("price").and_then(number_value),
                tax: p.get("tax").and_then(number_value),
            })
            .collect()
    }

    pub fn detail_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.raw.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// First non-empty contact id among the shapes Holded has been seen to use.
    pub fn contact_id_candidate(&self) -> Option<String> {
        const PATHS: &[&[&str]] = &[
            &["contactId"],
            &["contact", "id"],
            &["contact", "_id"],
            &["client", "id"],
            &["client", "_id"],
            &["customer", "id"],
            &["customer", "_id"],
        ];
        PATHS
            .iter()
            .find_map(|p| lookup_path(&self.raw, p).and_then(text_value))
    }

    /// Best-effort client name and the field it came from.
    pub fn client_name(&self) -> Option<(String, &'static str)> {
        const PATHS: &[(&[&str], &str)] = &[
            (&["contactName"], "contactName"),
            (&["contact", "name"], "contact.name"),
            (&["client", "name"], "client.name"),
            (&["customer", "name"], "customer.name"),
        ];
        PATHS.iter().find_map(|(p, label)| {
            lookup_path(&self.raw, p)
                .and_then(text_value)
                .map(|name| (name, *label))
        })
    }

    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        self.field("updatedAt")
            .or_else(|| self.field("modifiedAt"))
            .and_then(timestamp_from_value)
    }

    /// Snapshot of the evidence fields present on this document.
    pub fn evidence(&self) -> Map<String, Value> {
        EVIDENCE_FIELDS
            .iter()
            .filter_map(|k| self.field(k).map(|v| (k.to_string(), v.clone())))
            .collect()
    }
}

/// Id of a list item (`id`, then `_id`).
pub fn item_id(item: &Value) -> Option<String> {
    item.get("id")
        .and_then(text_value)
        .or_else(|| item.get("_id").and_then(text_value))
}

/// Best-known change timestamp of a list item: `updatedAt`, then `createdAt`,
/// then the document's own `date`.
pub fn best_timestamp(item: &Value) -> Option<DateTime<Utc>> {
    ["updatedAt", "createdAt", "date"]
        .iter()
        .find_map(|k| item.get(*k).and_then(timestamp_from_value))
}

/// Interpret a timestamp-ish value. Numbers above 1e12 are milliseconds, above
/// 1e9 seconds; smaller numbers are rejected. Strings may be numeric, RFC 3339,
/// or a bare `YYYY-MM-DD` date (midnight UTC).
pub fn timestamp_from_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_f64().and_then(epoch_to_datetime),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            if s.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
                return s.parse::<f64>().ok().and_then(epoch_to_datetime);
            }
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| Utc.from_utc_datetime(&dt))
        }
        _ => None,
    }
}

fn epoch_to_datetime(v: f64) -> Option<DateTime<Utc>> {
    if !v.is_finite() {
        return None;
    }
    let millis = if v > 1e12 {
        v
    } else if v > 1e9 {
        v * 1000.0
    } else {
        return None;
    };
    Utc.timestamp_millis_opt(millis as i64).single()
}

/// UTC calendar date of a unix-seconds invoice date. Non-finite or
/// non-positive values yield `None`.
pub fn unix_seconds_to_date(secs: f64) -> Option<NaiveDate> {
    if !secs.is_finite() || secs <= 0.0 {
        return None;
    }
    DateTime::<Utc>::from_timestamp(secs.trunc() as i64, 0).map(|dt| dt.date_naive())
}

pub(crate) fn number_value(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

pub(crate) fn text_value(v: &Value) -> Option<String> {
    let s = match v {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

fn lookup_path<'a>(raw: &'a Map<String, Value>, path: &[&str]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    let mut current = raw.get(*first)?;
    for key in rest {
        current = current.get(*key)?;
    }
    (!current.is_null()).then_some(current)
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn detail(v: Value) -> DocumentDetail {
        DocumentDetail::try_from(v).unwrap()
    }

    #[test]
    fn doc_number_is_trimmed_and_empty_is_none() {
        assert_eq!(detail(json!({ "docNumber": " F-001 " })).doc_number().as_deref(), Some("F-001"));
        assert_eq!(detail(json!({ "docNumber": "   " })).doc_number(), None);
        assert_eq!(detail(json!({ "docNumber": null })).doc_number(), None);
        assert_eq!(detail(json!({})).doc_number(), None);
    }

    #[test]
    fn numbers_accept_numeric_strings() {
        let d = detail(json!({ "subtotal": "100.5", "tax": 21, "total": "oops" }));
        assert_eq!(d.subtotal(), Some(100.5));
        assert_eq!(d.tax(), Some(21.0));
        assert_eq!(d.total(), None);
    }

    #[test]
    fn products_are_read_leniently() {
        let d = detail(json!({
            "products": [
                { "name": "Serum", "units": 2, "price": "10.5", "tax": 21 },
                { "description": "Gift", "units": 0 }
            ]
        }));
        let products = d.products();
        assert_eq!(products.len(), 2);
        assert_eq!(products[0].name.as_deref(), Some("Serum"));
        assert_eq!(products[0].price, Some(10.5));
        assert_eq!(products[1].units, Some(0.0));
        assert_eq!(products[1].price, None);
    }

    #[test]
    fn non_object_detail_is_rejected() {
        let err = DocumentDetail::try_from(json!([1, 2])).unwrap_err();
        assert!(err.contains("array"), "got: {err}");
    }

    #[test]
    fn contact_fields_follow_priority() {
        let d = detail(json!({
            "contact": { "id": "c-1", "name": "Farmacia Sol" },
            "customer": { "id": "c-2" }
        }));
        assert_eq!(d.contact_id_candidate().as_deref(), Some("c-1"));
        assert_eq!(d.client_name(), Some(("Farmacia Sol".to_string(), "contact.name")));

        let d = detail(json!({ "contactName": "Direct", "contact": { "name": "Nested" } }));
        assert_eq!(d.client_name(), Some(("Direct".to_string(), "contactName")));
    }

    #[test]
    fn timestamps_accept_seconds_millis_and_strings() {
        let secs = timestamp_from_value(&json!(1_705_312_800)).unwrap();
        let millis = timestamp_from_value(&json!(1_705_312_800_000_i64)).unwrap();
        let numeric = timestamp_from_value(&json!("1705312800")).unwrap();
        let rfc = timestamp_from_value(&json!("2024-01-15T10:00:00Z")).unwrap();
        assert_eq!(secs, millis);
        assert_eq!(secs, numeric);
        assert_eq!(secs, rfc);

        let day = timestamp_from_value(&json!("2024-01-15")).unwrap();
        assert_eq!(day.to_rfc3339(), "2024-01-15T00:00:00+00:00");

        assert!(timestamp_from_value(&json!(12345)).is_none());
        assert!(timestamp_from_value(&json!("")).is_none());
        assert!(timestamp_from_value(&json!(true)).is_none());
    }

    #[test]
    fn best_timestamp_prefers_updated_then_created_then_date() {
        let item = json!({ "updatedAt": 1_705_312_800, "createdAt": 1_600_000_000, "date": 1_500_000_000 });
        assert_eq!(best_timestamp(&item).unwrap().timestamp(), 1_705_312_800);

        let item = json!({ "updatedAt": null, "createdAt": 1_600_000_000, "date": 1_500_000_000 });
        assert_eq!(best_timestamp(&item).unwrap().timestamp(), 1_600_000_000);

        let item = json!({ "date": 1_500_000_000 });
        assert_eq!(best_timestamp(&item).unwrap().timestamp(), 1_500_000_000);

        assert!(best_timestamp(&json!({ "id": "x" })).is_none());
    }

    #[test]
    fn invoice_date_requires_positive_seconds() {
        assert_eq!(
            unix_seconds_to_date(1_705_312_800.0),
            NaiveDate::from_ymd_opt(2024, 1, 15)
        );
        assert!(unix_seconds_to_date(0.0).is_none());
        assert!(unix_seconds_to_date(-5.0).is_none());
        assert!(unix_seconds_to_date(f64::NAN).is_none());
    }

    #[test]
    fn item_id_falls_back_to_underscore_id() {
        assert_eq!(item_id(&json!({ "id": "a" })).as_deref(), Some("a"));
        assert_eq!(item_id(&json!({ "_id": "b" })).as_deref(), Some("b"));
        assert_eq!(item_id(&json!({ "id": " " })), None);
    }
}
