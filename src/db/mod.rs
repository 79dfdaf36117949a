pub mod error;
pub mod invoices;
pub mod pool;
pub mod repositories;
pub mod run_ledger;
pub mod sync_state;

#[cfg(test)]
pub mod memory;

pub use error::{StoreError, StoreResult};
pub use invoices::PgInvoiceStore;
pub use pool::{create_pool, run_migrations};
pub use repositories::{InvoiceStore, RunLedger, SyncStateStore, WritePlan};
pub use run_ledger::PgRunLedger;
pub use sync_state::PgSyncStateStore;
