use std::time::Duration;

use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;

use crate::config::HoldedConfig;

const INVOICING_PATH: [&str; 3] = ["api", "invoicing", "v1"];
const MIN_API_KEY_LEN: usize = 10;
/// Response bodies kept on errors are cut to this many characters.
pub const MAX_ERROR_BODY_CHARS: usize = 2048;

/// Failure taxonomy for upstream calls. Every variant carries the request URL.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HoldedError {
    #[error("configuration error: {reason} ({url})")]
    Config { url: String, reason: String },

    #[error("request timeout after {timeout_ms}ms ({url})")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("network error: {message} ({url})")]
    Network { url: String, message: String },

    #[error("rate limited, HTTP 429 ({url})")]
    RateLimit { url: String, body: String },

    #[error("HTTP {status} ({url})")]
    Http { url: String, status: u16, body: String },

    #[error("malformed JSON body: {message} ({url})")]
    Parse {
        url: String,
        status: u16,
        message: String,
        body: String,
    },
}

impl HoldedError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config { .. } => "CONFIG",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Network { .. } => "NETWORK",
            Self::RateLimit { .. } => "RATE_LIMIT",
            Self::Http { .. } => "HTTP",
            Self::Parse { .. } => "PARSE",
        }
    }

    pub fn url(&self) -> &str {
        match self {
            Self::Config { url, .. }
            | Self::Timeout { url, .. }
            | Self::Network { url, .. }
            | Self::RateLimit { url, .. }
            | Self::Http { url, .. }
            | Self::Parse { url, .. } => url,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RateLimit { .. } => Some(StatusCode::TOO_MANY_REQUESTS.as_u16()),
            Self::Http { status, .. } | Self::Parse { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn body(&self) -> Option<&str> {
        match self {
            Self::RateLimit { body, .. } | Self::Http { body, .. } | Self::Parse { body, .. } => {
                Some(body)
            }
            _ => None,
        }
    }
}

/// Single entry point for all traffic to the Holded invoicing API. Read-only.
#[derive(Clone)]
pub struct HoldedClient {
    client: Client,
    config: HoldedConfig,
    request_id: Option<String>,
}

impl HoldedClient {
    pub fn new(config: HoldedConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            client,
            config,
            request_id: None,
        })
    }

    pub fn config(&self) -> &HoldedConfig {
        &self.config
    }

    /// A handle that tags every request with `x-request-id`.
    pub fn with_request_id(&self, request_id: impl Into<String>) -> Self {
        Self {
            client: self.client.clone(),
            config: self.config.clone(),
            request_id: Some(request_id.into()),
        }
    }

    pub async fn list_documents(
        &self,
        doc_type: &str,
        query: &[(&str, String)],
    ) -> Result<Value, HoldedError> {
        self.get_json(&["documents", doc_type], query).await
    }

    pub async fn document_detail(&self, doc_type: &str, id: &str) -> Result<Value, HoldedError> {
        if id.trim().is_empty() {
            return Err(HoldedError::Config {
                url: self.describe_url(&["documents", doc_type]),
                reason: "missing document id".to_string(),
            });
        }
        self.get_json(&["documents", doc_type, id.trim()], &[]).await
    }

    pub async fn contact_detail(&self, contact_id: &str) -> Result<Value, HoldedError> {
        if contact_id.trim().is_empty() {
            return Err(HoldedError::Config {
                url: self.describe_url(&["contacts"]),
                reason: "missing contact id".to_string(),
            });
        }
        self.get_json(&["contacts", contact_id.trim()], &[]).await
    }

    /// GET a path under the invoicing API and decode the JSON body.
    ///
    /// 429, 5xx, timeouts and connection failures are retried up to
    /// `max_retries` times with `base + attempt² × step` backoff. Any other
    /// non-2xx status fails on the first attempt.
    pub async fn get_json(
        &self,
        segments: &[&str],
        query: &[(&str, String)],
    ) -> Result<Value, HoldedError> {
        let url = self.build_url(segments, query)?;
        let url_str = url.to_string();
        let api_key = self.api_key(&url_str)?;

        let mut attempt: u32 = 0;
        loop {
            let last_attempt = attempt >= self.config.max_retries;

            let mut request = self
                .client
                .get(url.clone())
                .header("key", api_key)
                .header(ACCEPT, "application/json");
            if let Some(request_id) = &self.request_id {
                request = request.header("x-request-id", request_id);
            }

            let response = match request.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    let err = if e.is_timeout() {
                        HoldedError::Timeout {
                            url: url_str.clone(),
                            timeout_ms: self.config.timeout_ms,
                        }
                    } else {
                        HoldedError::Network {
                            url: url_str.clone(),
                            message: e.to_string(),
                        }
                    };
                    if last_attempt {
                        return Err(err);
                    }
                    attempt += 1;
                    self.backoff(attempt, &err).await;
                    continue;
                }
            };

            let status = response.status();
            let text = match response.text().await {
                Ok(text) => text,
                Err(e) => {
                    let err = if e.is_timeout() {
                        HoldedError::Timeout {
                            url: url_str.clone(),
                            timeout_ms: self.config.timeout_ms,
                        }
                    } else {
                        HoldedError::Network {
                            url: url_str.clone(),
                            message: e.to_string(),
                        }
                    };
                    if last_attempt {
                        return Err(err);
                    }
                    attempt += 1;
                    self.backoff(attempt, &err).await;
                    continue;
                }
            };

            if status.is_success() {
                return serde_json::from_str::<Value>(&text).map_err(|e| HoldedError::Parse {
                    url: url_str.clone(),
                    status: status.as_u16(),
                    message: e.to_string(),
                    body: truncate_body(&text),
                });
            }

            let err = if status == StatusCode::TOO_MANY_REQUESTS {
                HoldedError::RateLimit {
                    url: url_str.clone(),
                    body: truncate_body(&text),
                }
            } else {
                HoldedError::Http {
                    url: url_str.clone(),
                    status: status.as_u16(),
                    body: truncate_body(&text),
                }
            };

            if !is_transient(status) || last_attempt {
                return Err(err);
            }
            attempt += 1;
            self.backoff(attempt, &err).await;
        }
    }

    async fn backoff(&self, attempt: u32, cause: &HoldedError) {
        let delay = backoff_delay(
            attempt,
            self.config.backoff_base_ms,
            self.config.backoff_step_ms,
        );
        tracing::warn!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            code = cause.code(),
            url = cause.url(),
            "holded request failed, retrying after backoff"
        );
        tokio::time::sleep(delay).await;
    }

    fn api_key(&self, url: &str) -> Result<&str, HoldedError> {
        match self.config.api_key.as_deref().map(str::trim) {
            Some(key) if key.len() >= MIN_API_KEY_LEN => Ok(key),
            _ => Err(HoldedError::Config {
                url: url.to_string(),
                reason: "HOLDED_API_KEY missing or invalid".to_string(),
            }),
        }
    }

    fn build_url(&self, segments: &[&str], query: &[(&str, String)]) -> Result<Url, HoldedError> {
        let invalid = |reason: String| HoldedError::Config {
            url: self.config.api_base.clone(),
            reason,
        };

        let mut url = Url::parse(&self.config.api_base)
            .map_err(|e| invalid(format!("invalid api base: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| invalid("api base cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(INVOICING_PATH)
            .extend(segments);

        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in query {
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }

    fn describe_url(&self, segments: &[&str]) -> String {
        self.build_url(segments, &[])
            .map(|u| u.to_string())
            .unwrap_or_else(|_| self.config.api_base.clone())
    }
}

fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Delay before retry number `attempt` (1-based).
pub fn backoff_delay(attempt: u32, base_ms: u64, step_ms: u64) -> Duration {
    let attempt = u64::from(attempt);
    Duration::from_millis(base_ms + attempt * attempt * step_ms)
}

pub fn truncate_body(text: &str) -> String {
    if text.chars().count() <= MAX_ERROR_BODY_CHARS {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(MAX_ERROR_BODY_CHARS).collect();
    cut.push('…');
    cut
}
