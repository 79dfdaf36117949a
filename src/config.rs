use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub holded: HoldedConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Static bearer for the trigger endpoints. Unset means the endpoints answer 500.
    #[serde(default)]
    pub internal_bearer: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Upstream invoicing API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldedConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_step_ms")]
    pub backoff_step_ms: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    /// Look up the contact when a document only carries a contact id.
    #[serde(default)]
    pub resolve_contacts: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_job_name")]
    pub job_name: String,
    #[serde(default = "default_lock_key")]
    pub lock_key: String,
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,
    #[serde(default)]
    pub lock_backend: LockBackend,
    #[serde(default = "default_limit")]
    pub default_limit: u32,
    #[serde(default = "default_max_limit")]
    pub max_limit: u32,
    #[serde(default = "default_fallback_window_days")]
    pub fallback_window_days: i64,
    #[serde(default = "default_accepted_currencies")]
    pub accepted_currencies: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockBackend {
    #[default]
    Memory,
    Postgres,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_database_url() -> String {
    "postgres://localhost/holded_sync".to_string()
}
fn default_max_connections() -> u32 {
    20
}
fn default_true() -> bool {
    true
}
fn default_api_base() -> String {
    "https://api.holded.com".to_string()
}
fn default_timeout_ms() -> u64 {
    12_000
}
fn default_max_retries() -> u32 {
    2
}
fn default_backoff_base_ms() -> u64 {
    250
}
fn default_backoff_step_ms() -> u64 {
    150
}
fn default_page_size() -> u32 {
    50
}
fn default_max_pages() -> u32 {
    20
}
fn default_job_name() -> String {
    "holded_invoices_incremental".to_string()
}
fn default_lock_key() -> String {
    "holded_invoices_import_incremental".to_string()
}
fn default_lock_ttl_secs() -> u64 {
    600
}
fn default_limit() -> u32 {
    50
}
fn default_max_limit() -> u32 {
    300
}
fn default_fallback_window_days() -> i64 {
    30
}
fn default_accepted_currencies() -> Vec<String> {
    vec!["EUR".to_string()]
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            holded: HoldedConfig::default(),
            sync: SyncConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            internal_bearer: None,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            run_migrations: true,
        }
    }
}

impl Default for HoldedConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            api_key: None,
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_step_ms: default_backoff_step_ms(),
            page_size: default_page_size(),
            max_pages: default_max_pages(),
            resolve_contacts: false,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            job_name: default_job_name(),
            lock_key: default_lock_key(),
            lock_ttl_secs: default_lock_ttl_secs(),
            lock_backend: LockBackend::default(),
            default_limit: default_limit(),
            max_limit: default_max_limit(),
            fallback_window_days: default_fallback_window_days(),
            accepted_currencies: default_accepted_currencies(),
        }
    }
}

/// Well-known environment variables mapped onto config keys.
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("DATABASE_URL", "database.url"),
    ("SERVER_HOST", "server.host"),
    ("SERVER_PORT", "server.port"),
    ("SYNC_INTERNAL_BEARER", "server.internal_bearer"),
    ("HOLDED_API_KEY", "holded.api_key"),
    ("HOLDED_API_BASE", "holded.api_base"),
    ("LOG_LEVEL", "log_level"),
];

impl AppConfig {
    /// Load configuration: defaults, then `holded-sync.toml` if present, then
    /// `HOLDSYNC__SECTION__KEY` variables, then the well-known variables above.
    pub fn load() -> Result<Self, ConfigError> {
        // best-effort .env load; ignore if missing
        let _ = dotenvy::dotenv();

        let mut builder = Config::builder()
            .add_source(File::with_name("holded-sync").required(false))
            .add_source(
                Environment::with_prefix("HOLDSYNC")
                    .prefix_separator("__")
                    .separator("__"),
            );

        for (var, key) in ENV_OVERRIDES {
            builder = builder.set_override_option(*key, std::env::var(var).ok())?;
        }

        Self::from_builder(builder)
    }

    pub fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        builder.build()?.try_deserialize()
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
