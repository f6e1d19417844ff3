//! Publication of the public JWK Set with conditional GET.
use axum::{
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use crate::key_store::KeyStore;

/// `Cache-Control` of the key set.
pub const JWKS_CACHE_CONTROL: &str = "public, max-age=3600";

/// Respond with the key set, or 304 when the caller's `If-None-Match` already
/// names the current entity tag.
pub fn publish(keys: &KeyStore, headers: &HeaderMap) -> Response {
    let etag = keys.etag();
    let Ok(etag_value) = HeaderValue::from_str(etag) else {
        // Base64url in quotes is always a valid header value.
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };
    let cache_headers = [
        (header::ETAG, etag_value),
        (
            header::CACHE_CONTROL,
            HeaderValue::from_static(JWKS_CACHE_CONTROL),
        ),
    ];

    if if_none_match(headers, etag) {
        return (StatusCode::NOT_MODIFIED, cache_headers).into_response();
    }
    (cache_headers, Json(keys.public_key_set())).into_response()
}

/// Whether any `If-None-Match` entity tag matches `etag`, using the weak
/// comparison RFC 9110 prescribes for `If-None-Match`.
fn if_none_match(headers: &HeaderMap, etag: &str) -> bool {
    headers
        .get_all(header::IF_NONE_MATCH)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .any(|tag| tag == "*" || tag.strip_prefix("W/").unwrap_or(tag) == etag)
}
