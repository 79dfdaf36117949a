//! In-memory stores used by the service tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::{StoreError, StoreResult};
use super::repositories::{InvoiceStore, RunLedger, SyncStateStore, WritePlan};
use crate::models::{
    InvoiceItemRecord, InvoiceRecord, NewRunRecord, RunOutcome, RunRecord, StoredInvoice,
    StoredInvoiceItem, SyncState,
};

#[derive(Default)]
struct Inner {
    invoices: Vec<StoredInvoice>,
    items: HashMap<i64, Vec<StoredInvoiceItem>>,
    next_invoice_id: i64,
    next_item_id: i64,
    state: Option<SyncState>,
    runs: Vec<RunRecord>,
    fail_writes_for: HashSet<String>,
    fail_state_read: bool,
    writes: usize,
}

/// Implements every store trait over shared maps. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `write_invoice` fail for this upstream id.
    pub fn fail_writes_for(&self, external_id: &str) {
        self.inner.lock().unwrap().fail_writes_for.insert(external_id.to_string());
    }

    pub fn clear_write_failures(&self) {
        self.inner.lock().unwrap().fail_writes_for.clear();
    }

    pub fn fail_state_read(&self, fail: bool) {
        self.inner.lock().unwrap().fail_state_read = fail;
    }

    pub fn set_cursor(&self, cursor: DateTime<Utc>) {
        self.inner.lock().unwrap().state = Some(SyncState {
            last_cursor: Some(cursor),
            last_sync_at: None,
            updated_at: Utc::now(),
        });
    }

    pub fn cursor(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().unwrap().state.as_ref().and_then(|s| s.last_cursor)
    }

    pub fn invoices(&self) -> Vec<StoredInvoice> {
        self.inner.lock().unwrap().invoices.clone()
    }

    pub fn items_of(&self, invoice_id: i64) -> Vec<StoredInvoiceItem> {
        self.inner.lock().unwrap().items.get(&invoice_id).cloned().unwrap_or_default()
    }

    pub fn runs(&self) -> Vec<RunRecord> {
        self.inner.lock().unwrap().runs.clone()
    }

    /// Successful `write_invoice` calls so far.
    pub fn write_count(&self) -> usize {
        self.inner.lock().unwrap().writes
    }

    /// Seed a row directly, bypassing the write path.
    pub fn seed(&self, record: InvoiceRecord) -> i64 {
        let mut inner = self.inner.lock().unwrap();
        inner.next_invoice_id += 1;
        let id = inner.next_invoice_id;
        let now = Utc::now();
        inner.invoices.push(StoredInvoice { id, record, created_at: now, updated_at: now });
        id
    }
}

fn conflicts(existing: &StoredInvoice, record: &InvoiceRecord, own_id: Option<i64>) -> Option<String> {
    if Some(existing.id) == own_id || existing.record.source_provider != record.source_provider {
        return None;
    }
    if existing.record.external_invoice_id == record.external_invoice_id {
        return Some("invoices_provider_external_uidx".to_string());
    }
    if existing.record.invoice_number == record.invoice_number {
        return Some("invoices_provider_number_uidx".to_string());
    }
    None
}

#[async_trait]
impl InvoiceStore for MemoryStore {
    async fn find_by_external_id(
        &self,
        provider: &str,
        external_id: &str,
    ) -> StoreResult<Option<StoredInvoice>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .invoices
            .iter()
            .find(|i| i.record.source_provider == provider && i.record.external_invoice_id == external_id)
            .cloned())
    }

    async fn find_by_invoice_number(
        &self,
        provider: &str,
        invoice_number: &str,
    ) -> StoreResult<Option<StoredInvoice>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .invoices
            .iter()
            .find(|i| i.record.source_provider == provider && i.record.invoice_number == invoice_number)
            .cloned())
    }

    async fn write_invoice(
        &self,
        plan: WritePlan,
        record: &InvoiceRecord,
        items: &[InvoiceItemRecord],
    ) -> StoreResult<i64> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_writes_for.contains(&record.external_invoice_id) {
            return Err(StoreError::Corrupt(format!(
                "injected write failure for {}",
                record.external_invoice_id
            )));
        }

        let own_id = match plan {
            WritePlan::Insert => None,
            WritePlan::Update { invoice_id } => Some(invoice_id),
        };
        if let Some(name) = inner.invoices.iter().find_map(|e| conflicts(e, record, own_id)) {
            return Err(StoreError::Conflict(name));
        }

        let now = Utc::now();
        let invoice_id = match plan {
            WritePlan::Insert => {
                inner.next_invoice_id += 1;
                let id = inner.next_invoice_id;
                inner.invoices.push(StoredInvoice {
                    id,
                    record: record.clone(),
                    created_at: now,
                    updated_at: now,
                });
                id
            }
            WritePlan::Update { invoice_id } => {
                let row = inner
                    .invoices
                    .iter_mut()
                    .find(|i| i.id == invoice_id)
                    .ok_or_else(|| StoreError::NotFound(format!("invoice {invoice_id}")))?;
                row.record = record.clone();
                row.updated_at = now;
                invoice_id
            }
        };

        let mut stored = Vec::with_capacity(items.len());
        for item in items {
            inner.next_item_id += 1;
            stored.push(StoredInvoiceItem {
                id: inner.next_item_id,
                invoice_id,
                item: item.clone(),
            });
        }
        inner.items.insert(invoice_id, stored);
        inner.writes += 1;
        Ok(invoice_id)
    }

    async fn list_items(&self, invoice_id: i64) -> StoreResult<Vec<StoredInvoiceItem>> {
        Ok(self.items_of(invoice_id))
    }
}

#[async_trait]
impl SyncStateStore for MemoryStore {
    async fn read(&self) -> StoreResult<Option<SyncState>> {
        let inner = self.inner.lock().unwrap();
        if inner.fail_state_read {
            return Err(StoreError::Corrupt("injected state read failure".to_string()));
        }
        Ok(inner.state.clone())
    }

    async fn advance(&self, cursor: DateTime<Utc>, synced_at: DateTime<Utc>) -> StoreResult<SyncState> {
        let mut inner = self.inner.lock().unwrap();
        let last_cursor = match inner.state.as_ref().and_then(|s| s.last_cursor) {
            Some(prev) if prev > cursor => prev,
            _ => cursor,
        };
        let state = SyncState {
            last_cursor: Some(last_cursor),
            last_sync_at: Some(synced_at),
            updated_at: Utc::now(),
        };
        inner.state = Some(state.clone());
        Ok(state)
    }
}

#[async_trait]
impl RunLedger for MemoryStore {
    async fn start(&self, run: &NewRunRecord) -> StoreResult<i64> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.runs.len() as i64 + 1;
        inner.runs.push(RunRecord::from_new(id, run));
        Ok(id)
    }

    async fn finish(&self, run_id: i64, outcome: &RunOutcome) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let run = inner
            .runs
            .iter_mut()
            .find(|r| r.id == run_id && r.is_open())
            .ok_or_else(|| StoreError::NotFound(format!("open run {run_id}")))?;
        run.apply(outcome);
        Ok(())
    }

    async fn latest(&self, job: &str) -> StoreResult<Option<RunRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.runs.iter().rev().find(|r| r.job == job).cloned())
    }
}
