use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StoreResult;
use crate::models::{
    InvoiceItemRecord, InvoiceRecord, NewRunRecord, RunOutcome, RunRecord, StoredInvoice,
    StoredInvoiceItem, SyncState,
};

/// How a reconciled header reaches storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePlan {
    Insert,
    Update { invoice_id: i64 },
}

#[async_trait]
pub trait InvoiceStore: Send + Sync {
    async fn find_by_external_id(
        &self,
        provider: &str,
        external_id: &str,
    ) -> StoreResult<Option<StoredInvoice>>;

    async fn find_by_invoice_number(
        &self,
        provider: &str,
        invoice_number: &str,
    ) -> StoreResult<Option<StoredInvoice>>;

    /// Write the header per `plan` and replace all of its items, atomically.
    /// Returns the invoice id.
    async fn write_invoice(
        &self,
        plan: WritePlan,
        record: &InvoiceRecord,
        items: &[InvoiceItemRecord],
    ) -> StoreResult<i64>;

    async fn list_items(&self, invoice_id: i64) -> StoreResult<Vec<StoredInvoiceItem>>;
}

#[async_trait]
pub trait SyncStateStore: Send + Sync {
    async fn read(&self) -> StoreResult<Option<SyncState>>;

    /// Move the cursor forward to `cursor`. Never moves it backwards.
    async fn advance(&self, cursor: DateTime<Utc>, synced_at: DateTime<Utc>) -> StoreResult<SyncState>;
}

#[async_trait]
pub trait RunLedger: Send + Sync {
    /// Insert a run with `stage = "started"` and return its id.
    async fn start(&self, run: &NewRunRecord) -> StoreResult<i64>;

    /// Close a started run. Called exactly once per run.
    async fn finish(&self, run_id: i64, outcome: &RunOutcome) -> StoreResult<()>;

    async fn latest(&self, job: &str) -> StoreResult<Option<RunRecord>>;
}
