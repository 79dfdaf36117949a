pub mod invoice;
pub mod report;
pub mod sync;

pub use invoice::{
    InvoiceItemRecord, InvoiceRecord, LineType, Provenance, StateCode, StoredInvoice,
    StoredInvoiceItem, PROVIDER_HOLDED,
};
pub use report::{CursorReport, FailedDocument, RunReport, RunTimes, SkippedDocument};
pub use sync::{
    CiProvenance, CursorSource, NewRunRecord, RunMode, RunOutcome, RunRecord, SyncState,
    STAGE_COMPLETED, STAGE_EXCEPTION, STAGE_STARTED,
};
