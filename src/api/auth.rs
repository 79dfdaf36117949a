use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use super::error::ApiError;
use super::AppState;

/// Proof that the request carried the internal bearer token.
pub struct InternalBearer;

/// Check an `Authorization` header value against the configured token.
pub fn check_bearer(header: Option<&str>, expected: Option<&str>) -> Result<(), ApiError> {
    let expected = expected
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(ApiError::BearerNotConfigured)?;

    let header = header.map(str::trim).unwrap_or_default();
    let (scheme, token) = header.split_once(char::is_whitespace).ok_or(ApiError::MissingBearer)?;
    if !scheme.eq_ignore_ascii_case("bearer") || token.trim().is_empty() {
        return Err(ApiError::MissingBearer);
    }

    if token.trim() != expected {
        return Err(ApiError::Forbidden);
    }
    Ok(())
}

#[async_trait]
impl FromRequestParts<AppState> for InternalBearer {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts.headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
        check_bearer(header, state.internal_bearer.as_deref())?;
        Ok(InternalBearer)
    }
}
