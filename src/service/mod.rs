pub mod normalize;
pub mod orchestrator;
pub mod reconciler;

pub use orchestrator::{RunArgs, SyncError, SyncOrchestrator, SyncSettings};
pub use reconciler::{
    ImportError, ImportStep, InvoiceReconciler, ReconcileAction, ReconcileOutcome, RejectionKind,
};
