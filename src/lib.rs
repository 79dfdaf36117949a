pub mod api;
pub mod config;
pub mod db;
pub mod holded;
pub mod lock;
pub mod models;
pub mod service;

pub use config::AppConfig;
pub use db::create_pool;
pub use service::{RunArgs, SyncError, SyncOrchestrator};
