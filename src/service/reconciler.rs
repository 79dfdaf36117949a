use std::fmt;
use std::sync::Arc;

use bigdecimal::BigDecimal;

use super::normalize::{self, LineRejection};
use crate::db::{InvoiceStore, StoreError, WritePlan};
use crate::holded::models::{text_value, unix_seconds_to_date};
use crate::holded::{DocumentDetail, HoldedClient, HoldedError, DOC_TYPE_INVOICE};
use crate::models::{
    InvoiceItemRecord, InvoiceRecord, Provenance, StateCode, StoredInvoice, PROVIDER_HOLDED,
};

const CLIENT_NAME_FROM_CONTACT: &str = "contact_detail";

/// Why a document was refused before anything was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    MissingInvoiceNumber,
    InvalidInvoiceDate,
    NegativeUnits,
    InvalidUnits,
    AmbiguousMatch,
}

impl RejectionKind {
    /// Skips are counted apart from failures and do not hold the cursor back.
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::MissingInvoiceNumber)
    }

    pub fn step(&self) -> ImportStep {
        match self {
            Self::MissingInvoiceNumber => ImportStep::InvoiceNumber,
            Self::InvalidInvoiceDate => ImportStep::InvoiceDate,
            Self::NegativeUnits | Self::InvalidUnits => ImportStep::ItemsUnits,
            Self::AmbiguousMatch => ImportStep::InvoiceLookup,
        }
    }
}

/// Stage of a single-document import, reported with each failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportStep {
    Detail,
    InvoiceNumber,
    InvoiceDate,
    ItemsUnits,
    InvoiceLookup,
    InvoiceWrite,
}

impl ImportStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detail => "holded_detail",
            Self::InvoiceNumber => "invoice_number",
            Self::InvoiceDate => "invoice_date",
            Self::ItemsUnits => "items_units",
            Self::InvoiceLookup => "invoice_lookup",
            Self::InvoiceWrite => "invoice_write",
        }
    }
}

impl fmt::Display for ImportStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error(transparent)]
    Detail(HoldedError),

    #[error("{message}")]
    Rejected { kind: RejectionKind, message: String },

    #[error("invoice lookup failed: {0}")]
    Lookup(StoreError),

    #[error("invoice write failed: {0}")]
    Write(StoreError),
}

impl ImportError {
    fn rejected(kind: RejectionKind, message: impl Into<String>) -> Self {
        Self::Rejected {
            kind,
            message: message.into(),
        }
    }

    pub fn step(&self) -> ImportStep {
        match self {
            Self::Detail(_) => ImportStep::Detail,
            Self::Rejected { kind, .. } => kind.step(),
            Self::Lookup(_) => ImportStep::InvoiceLookup,
            Self::Write(_) => ImportStep::InvoiceWrite,
        }
    }

    pub fn rejection(&self) -> Option<RejectionKind> {
        match self {
            Self::Rejected { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn is_skip(&self) -> bool {
        self.rejection().is_some_and(|k| k.is_skip())
    }

    /// Upstream error code, for client failures only.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Self::Detail(e) => Some(e.code()),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Detail(e) => e.status(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileAction {
    Inserted,
    Updated,
    /// Matched by invoice number and moved to a new upstream id.
    Realigned { previous_external_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub invoice_id: i64,
    pub action: ReconcileAction,
    pub items: usize,
    pub needs_review: bool,
}

/// Decide how to write a document given both lookups.
///
/// The external-id match wins when it is the only one or when both lookups
/// hit the same row. Two different rows are refused.
pub fn plan_write(
    by_external: Option<&StoredInvoice>,
    by_number: Option<&StoredInvoice>,
) -> Result<(WritePlan, ReconcileAction), ImportError> {
    match (by_external, by_number) {
        (Some(ext), Some(num)) if ext.id != num.id => Err(ImportError::rejected(
            RejectionKind::AmbiguousMatch,
            format!(
                "external id matches invoice {} but invoice number matches invoice {}",
                ext.id, num.id
            ),
        )),
        (Some(ext), _) => Ok((
            WritePlan::Update { invoice_id: ext.id },
            ReconcileAction::Updated,
        )),
        (None, Some(num)) => Ok((
            WritePlan::Update { invoice_id: num.id },
            ReconcileAction::Realigned {
                previous_external_id: num.record.external_invoice_id.clone(),
            },
        )),
        (None, None) => Ok((WritePlan::Insert, ReconcileAction::Inserted)),
    }
}

/// Fetches one upstream invoice and converges the local rows onto it.
pub struct InvoiceReconciler {
    client: HoldedClient,
    invoices: Arc<dyn InvoiceStore>,
    accepted_currencies: Vec<String>,
    resolve_contacts: bool,
}

impl InvoiceReconciler {
    pub fn new(
        client: HoldedClient,
        invoices: Arc<dyn InvoiceStore>,
        accepted_currencies: Vec<String>,
    ) -> Self {
        let resolve_contacts = client.config().resolve_contacts;
        Self {
            client,
            invoices,
            accepted_currencies,
            resolve_contacts,
        }
    }

    pub async fn reconcile_one(&self, external_id: &str) -> Result<ReconcileOutcome, ImportError> {
        let body = self
            .client
            .document_detail(DOC_TYPE_INVOICE, external_id)
            .await
            .map_err(ImportError::Detail)?;
        let detail = DocumentDetail::try_from(body).map_err(|message| {
            ImportError::Detail(HoldedError::Parse {
                url: format!("documents/{DOC_TYPE_INVOICE}/{external_id}"),
                status: 200,
                message,
                body: String::new(),
            })
        })?;

        let (mut record, items) = self.build(external_id, &detail)?;

        if record.source_meta.client_name_source.is_none() {
            if let Some((name, source)) = self.resolve_client_name(&detail).await {
                record.client_name = Some(name);
                record.source_meta.client_name_source = Some(source.to_string());
            }
        }

        let by_external = self
            .invoices
            .find_by_external_id(PROVIDER_HOLDED, external_id)
            .await
            .map_err(ImportError::Lookup)?;
        let by_number = self
            .invoices
            .find_by_invoice_number(PROVIDER_HOLDED, &record.invoice_number)
            .await
            .map_err(ImportError::Lookup)?;

        let (plan, action) = plan_write(by_external.as_ref(), by_number.as_ref()).map_err(|e| {
            tracing::warn!(
                external_id,
                invoice_number = %record.invoice_number,
                by_external = ?by_external.as_ref().map(|i| i.id),
                by_number = ?by_number.as_ref().map(|i| i.id),
                "ambiguous invoice match, leaving both rows untouched"
            );
            e
        })?;

        // carry the upstream-id history of the row being written
        let existing = by_external.as_ref().or(by_number.as_ref());
        if let Some(existing) = existing {
            let mut superseded = existing.record.source_meta.superseded_external_ids.clone();
            if let ReconcileAction::Realigned { previous_external_id } = &action {
                if previous_external_id != external_id && !superseded.contains(previous_external_id) {
                    superseded.push(previous_external_id.clone());
                }
            }
            record.source_meta.superseded_external_ids = superseded;
        }

        let invoice_id = self
            .invoices
            .write_invoice(plan, &record, &items)
            .await
            .map_err(ImportError::Write)?;

        if let ReconcileAction::Realigned { previous_external_id } = &action {
            tracing::info!(
                invoice_id,
                external_id,
                previous_external_id = %previous_external_id,
                "invoice realigned to new upstream id"
            );
        }
        tracing::debug!(invoice_id, external_id, ?action, items = items.len(), "invoice reconciled");

        Ok(ReconcileOutcome {
            invoice_id,
            action,
            items: items.len(),
            needs_review: record.needs_review,
        })
    }

    /// Header and items derived purely from the document. Every check that can
    /// refuse the document runs here, before any storage call.
    fn build(
        &self,
        external_id: &str,
        detail: &DocumentDetail,
    ) -> Result<(InvoiceRecord, Vec<InvoiceItemRecord>), ImportError> {
        let invoice_number = detail.doc_number().ok_or_else(|| {
            ImportError::rejected(
                RejectionKind::MissingInvoiceNumber,
                "SKIP: missing invoice number (docNumber is null or empty)",
            )
        })?;

        let invoice_date = detail
            .date_unix()
            .and_then(unix_seconds_to_date)
            .ok_or_else(|| {
                ImportError::rejected(RejectionKind::InvalidInvoiceDate, "missing or invalid invoice date")
            })?;

        let currency_raw = detail.currency_raw();
        let currency = normalize::normalize_currency(currency_raw.as_deref(), &self.accepted_currencies);
        let needs_review = currency.is_none();
        let state_code = StateCode::from_review(needs_review);

        let items = normalize::build_items(&detail.products(), state_code).map_err(|r| match r {
            LineRejection::Negative { index, units } => ImportError::rejected(
                RejectionKind::NegativeUnits,
                format!("negative units ({units}) on line {index}"),
            ),
            LineRejection::Fractional { index, units } => ImportError::rejected(
                RejectionKind::InvalidUnits,
                format!("non-integer units ({units}) on line {index}"),
            ),
        })?;

        let client_name = detail.client_name();
        let source_meta = Provenance {
            provider: PROVIDER_HOLDED.to_string(),
            external_id: external_id.to_string(),
            currency_raw,
            doc_number_raw: detail.field("docNumber").cloned(),
            date_unix: detail.field("date").cloned(),
            detail_keys: detail.detail_keys(),
            contact_id_candidate: detail.contact_id_candidate(),
            client_name_source: client_name.as_ref().map(|(_, source)| source.to_string()),
            superseded_external_ids: Vec::new(),
            raw: detail.evidence().into_iter().collect(),
        };

        let amount = |v: Option<f64>| v.map(normalize::decimal_from_f64).unwrap_or_else(|| BigDecimal::from(0));

        let record = InvoiceRecord {
            source_provider: PROVIDER_HOLDED.to_string(),
            external_invoice_id: external_id.to_string(),
            invoice_number,
            invoice_date,
            currency,
            total_net: amount(detail.subtotal()),
            total_vat: amount(detail.tax()),
            total_gross: amount(detail.total()),
            source_month: normalize::source_month(invoice_date),
            state_code,
            needs_review,
            client_name: client_name.map(|(name, _)| name),
            external_modified_at: detail.modified_at(),
            source_meta,
        };
        Ok((record, items))
    }

    /// Contact lookup for documents that carry only a contact id. Failures are
    /// logged and ignored.
    async fn resolve_client_name(&self, detail: &DocumentDetail) -> Option<(String, &'static str)> {
        if !self.resolve_contacts {
            return None;
        }
        let contact_id = detail.contact_id_candidate()?;
        match self.client.contact_detail(&contact_id).await {
            Ok(contact) => contact
                .get("name")
                .and_then(text_value)
                .map(|name| (name, CLIENT_NAME_FROM_CONTACT)),
            Err(e) => {
                tracing::warn!(contact_id = %contact_id, code = e.code(), error = %e, "contact lookup failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::holded::client::tests::test_config;
    use crate::models::LineType;
    use serde_json::{json, Value};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    // 2024-01-15T10:00:00Z
    const JAN_15: i64 = 1_705_312_800;

    fn invoice_json(id: &str, number: Option<&str>, currency: &str, products: Value) -> Value {
        json!({
            "id": id,
            "docNumber": number,
            "date": JAN_15,
            "currency": currency,
            "subtotal": 30.0,
            "tax": 6.3,
            "total": 36.3,
            "contactName": "Clinica Sol",
            "products": products,
        })
    }

    fn two_lines() -> Value {
        json!([
            { "name": "Serum", "units": 2, "price": 10.0, "tax": 21 },
            { "name": "Sample", "units": 0, "price": 10.0, "tax": 21 },
        ])
    }

    async fn mount_detail(server: &MockServer, id: &str, body: Value) {
        Mock::given(method("GET"))
            .and(path(format!("/api/invoicing/v1/documents/invoice/{id}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    fn reconciler(server: &MockServer, store: &MemoryStore) -> InvoiceReconciler {
        let client = HoldedClient::new(test_config(&server.uri())).unwrap();
        InvoiceReconciler::new(client, Arc::new(store.clone()), vec!["EUR".to_string()])
    }

    fn seeded(external_id: &str, number: &str) -> InvoiceRecord {
        InvoiceRecord {
            source_provider: PROVIDER_HOLDED.to_string(),
            external_invoice_id: external_id.to_string(),
            invoice_number: number.to_string(),
            invoice_date: chrono::NaiveDate::from_ymd_opt(2023, 12, 1).unwrap(),
            currency: Some("EUR".to_string()),
            total_net: BigDecimal::from(1),
            total_vat: BigDecimal::from(0),
            total_gross: BigDecimal::from(1),
            source_month: "2023-12".to_string(),
            state_code: StateCode::Open,
            needs_review: false,
            client_name: None,
            external_modified_at: None,
            source_meta: Provenance::default(),
        }
    }

    #[tokio::test]
    async fn first_import_inserts_header_and_items() {
        let server = MockServer::start().await;
        mount_detail(&server, "h1", invoice_json("h1", Some("F-001"), "EUR", two_lines())).await;
        let store = MemoryStore::new();

        let outcome = reconciler(&server, &store).reconcile_one("h1").await.unwrap();
        assert_eq!(outcome.action, ReconcileAction::Inserted);
        assert_eq!(outcome.items, 2);

        let invoices = store.invoices();
        assert_eq!(invoices.len(), 1);
        let record = &invoices[0].record;
        assert_eq!(record.invoice_number, "F-001");
        assert_eq!(record.source_month, "2024-01");
        assert_eq!(record.currency.as_deref(), Some("EUR"));
        assert_eq!(record.state_code, StateCode::Open);
        assert_eq!(record.client_name.as_deref(), Some("Clinica Sol"));
        assert_eq!(record.source_meta.client_name_source.as_deref(), Some("contactName"));
        assert_eq!(record.source_meta.doc_number_raw, Some(json!("F-001")));

        let items = store.items_of(outcome.invoice_id);
        assert_eq!(items[0].item.line_type, LineType::Sale);
        assert_eq!(items[0].item.line_net_amount, BigDecimal::from(20));
        assert_eq!(items[1].item.line_type, LineType::Promotion);
    }

    #[tokio::test]
    async fn reimport_converges_to_the_same_rows() {
        let server = MockServer::start().await;
        mount_detail(&server, "h1", invoice_json("h1", Some("F-001"), "EUR", two_lines())).await;
        let store = MemoryStore::new();
        let reconciler = reconciler(&server, &store);

        let first = reconciler.reconcile_one("h1").await.unwrap();
        let record_after_first = store.invoices()[0].record.clone();
        let items_after_first: Vec<_> =
            store.items_of(first.invoice_id).into_iter().map(|i| i.item).collect();

        let second = reconciler.reconcile_one("h1").await.unwrap();
        assert_eq!(second.action, ReconcileAction::Updated);
        assert_eq!(second.invoice_id, first.invoice_id);

        assert_eq!(store.invoices().len(), 1);
        assert_eq!(store.invoices()[0].record, record_after_first);
        let items_after_second: Vec<_> =
            store.items_of(second.invoice_id).into_iter().map(|i| i.item).collect();
        assert_eq!(items_after_second, items_after_first);
    }

    #[tokio::test]
    async fn known_number_under_new_id_is_realigned() {
        let server = MockServer::start().await;
        mount_detail(&server, "new-id", invoice_json("new-id", Some("F-001"), "EUR", two_lines())).await;
        let store = MemoryStore::new();
        let existing_id = store.seed(seeded("old-id", "F-001"));

        let outcome = reconciler(&server, &store).reconcile_one("new-id").await.unwrap();
        assert_eq!(outcome.invoice_id, existing_id);
        assert_eq!(
            outcome.action,
            ReconcileAction::Realigned {
                previous_external_id: "old-id".to_string()
            }
        );

        let invoices = store.invoices();
        assert_eq!(invoices.len(), 1);
        assert_eq!(invoices[0].record.external_invoice_id, "new-id");
        assert_eq!(invoices[0].record.source_meta.superseded_external_ids, vec!["old-id"]);

        // a later update by the new id keeps the history
        reconciler(&server, &store).reconcile_one("new-id").await.unwrap();
        assert_eq!(
            store.invoices()[0].record.source_meta.superseded_external_ids,
            vec!["old-id"]
        );
    }

    #[tokio::test]
    async fn negative_units_write_nothing() {
        let server = MockServer::start().await;
        let products = json!([
            { "name": "Serum", "units": 2, "price": 10.0, "tax": 21 },
            { "name": "Return", "units": -1, "price": 10.0, "tax": 21 },
        ]);
        mount_detail(&server, "h1", invoice_json("h1", Some("F-001"), "EUR", products)).await;
        let store = MemoryStore::new();
        let existing_id = store.seed(seeded("h1", "F-001"));
        let before = store.invoices();

        let err = reconciler(&server, &store).reconcile_one("h1").await.unwrap_err();
        assert_eq!(err.rejection(), Some(RejectionKind::NegativeUnits));
        assert_eq!(err.step(), ImportStep::ItemsUnits);
        assert!(!err.is_skip());

        assert_eq!(store.write_count(), 0);
        assert_eq!(store.invoices(), before);
        assert!(store.items_of(existing_id).is_empty());
    }

    #[tokio::test]
    async fn unaccepted_currency_marks_for_review() {
        let server = MockServer::start().await;
        mount_detail(&server, "h1", invoice_json("h1", Some("F-001"), "usd", two_lines())).await;
        let store = MemoryStore::new();

        let outcome = reconciler(&server, &store).reconcile_one("h1").await.unwrap();
        assert!(outcome.needs_review);

        let record = &store.invoices()[0].record;
        assert_eq!(record.currency, None);
        assert!(record.needs_review);
        assert_eq!(record.state_code, StateCode::PendingReview);
        assert_eq!(record.source_meta.currency_raw.as_deref(), Some("usd"));
        assert!(store
            .items_of(outcome.invoice_id)
            .iter()
            .all(|i| i.item.state_code == StateCode::PendingReview));
    }

    #[tokio::test]
    async fn lowercase_accepted_currency_is_normalized() {
        let server = MockServer::start().await;
        mount_detail(&server, "h1", invoice_json("h1", Some("F-001"), "eur", two_lines())).await;
        let store = MemoryStore::new();

        reconciler(&server, &store).reconcile_one("h1").await.unwrap();
        let record = &store.invoices()[0].record;
        assert_eq!(record.currency.as_deref(), Some("EUR"));
        assert!(!record.needs_review);
    }

    #[tokio::test]
    async fn missing_number_is_a_skip() {
        let server = MockServer::start().await;
        mount_detail(&server, "h1", invoice_json("h1", None, "EUR", two_lines())).await;
        let store = MemoryStore::new();

        let err = reconciler(&server, &store).reconcile_one("h1").await.unwrap_err();
        assert!(err.is_skip());
        assert_eq!(err.step(), ImportStep::InvoiceNumber);
        assert!(store.invoices().is_empty());
    }

    #[tokio::test]
    async fn missing_date_is_a_failure() {
        let server = MockServer::start().await;
        let mut body = invoice_json("h1", Some("F-001"), "EUR", two_lines());
        body["date"] = json!(0);
        mount_detail(&server, "h1", body).await;
        let store = MemoryStore::new();

        let err = reconciler(&server, &store).reconcile_one("h1").await.unwrap_err();
        assert_eq!(err.rejection(), Some(RejectionKind::InvalidInvoiceDate));
        assert!(!err.is_skip());
        assert!(store.invoices().is_empty());
    }

    #[tokio::test]
    async fn rows_split_across_both_keys_are_refused() {
        let server = MockServer::start().await;
        mount_detail(&server, "x", invoice_json("x", Some("F-010"), "EUR", two_lines())).await;
        let store = MemoryStore::new();
        store.seed(seeded("x", "F-009"));
        store.seed(seeded("y", "F-010"));
        let before = store.invoices();

        let err = reconciler(&server, &store).reconcile_one("x").await.unwrap_err();
        assert_eq!(err.rejection(), Some(RejectionKind::AmbiguousMatch));
        assert_eq!(err.step(), ImportStep::InvoiceLookup);
        assert_eq!(store.invoices(), before);
    }

    #[tokio::test]
    async fn upstream_error_is_reported_on_the_detail_step() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/invoicing/v1/documents/invoice/gone"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
            .mount(&server)
            .await;
        let store = MemoryStore::new();

        let err = reconciler(&server, &store).reconcile_one("gone").await.unwrap_err();
        assert_eq!(err.step(), ImportStep::Detail);
        assert_eq!(err.code(), Some("HTTP"));
        assert_eq!(err.status(), Some(404));
    }

    #[tokio::test]
    async fn empty_product_list_clears_items() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/invoicing/v1/documents/invoice/h1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(invoice_json("h1", Some("F-001"), "EUR", two_lines())),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        mount_detail(&server, "h1", invoice_json("h1", Some("F-001"), "EUR", json!([]))).await;
        let store = MemoryStore::new();
        let reconciler = reconciler(&server, &store);

        let first = reconciler.reconcile_one("h1").await.unwrap();
        assert_eq!(store.items_of(first.invoice_id).len(), 2);

        let second = reconciler.reconcile_one("h1").await.unwrap();
        assert_eq!(second.items, 0);
        assert!(store.items_of(first.invoice_id).is_empty());
    }

    #[tokio::test]
    async fn contact_name_is_resolved_when_enabled() {
        let server = MockServer::start().await;
        let mut body = invoice_json("h1", Some("F-001"), "EUR", two_lines());
        body.as_object_mut().unwrap().remove("contactName");
        body["contactId"] = json!("c-7");
        mount_detail(&server, "h1", body).await;
        Mock::given(method("GET"))
            .and(path("/api/invoicing/v1/contacts/c-7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": "Farmacia Luna" })))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = test_config(&server.uri());
        config.resolve_contacts = true;
        let store = MemoryStore::new();
        let reconciler = InvoiceReconciler::new(
            HoldedClient::new(config).unwrap(),
            Arc::new(store.clone()),
            vec!["EUR".to_string()],
        );

        reconciler.reconcile_one("h1").await.unwrap();
        let record = &store.invoices()[0].record;
        assert_eq!(record.client_name.as_deref(), Some("Farmacia Luna"));
        assert_eq!(record.source_meta.client_name_source.as_deref(), Some("contact_detail"));
        assert_eq!(record.source_meta.contact_id_candidate.as_deref(), Some("c-7"));
    }

    #[test]
    fn same_row_on_both_keys_is_a_plain_update() {
        let row = StoredInvoice {
            id: 4,
            record: seeded("x", "F-1"),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        let (plan, action) = plan_write(Some(&row), Some(&row)).unwrap();
        assert_eq!(plan, WritePlan::Update { invoice_id: 4 });
        assert_eq!(action, ReconcileAction::Updated);
    }
}
