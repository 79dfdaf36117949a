//! Read-only access to the Holded invoicing API.

pub mod client;
pub mod discovery;
pub mod models;

pub use client::{HoldedClient, HoldedError};
pub use discovery::{ChangedDocumentDiscovery, DiscoveredIds};
pub use models::DocumentDetail;

/// Document type used for sales invoices.
pub const DOC_TYPE_INVOICE: &str = "invoice";
