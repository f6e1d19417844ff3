//! Forwarding of authorization-code token requests to the IdP.
use std::{sync::Arc, time::Duration};

use axum::{
    body::Bytes,
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use openssl::memcmp;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    assertion::{self, CLIENT_ASSERTION_TYPE},
    config::Config,
    decode_header,
    key_store::KeyStore,
};

/// Single attempt, no retries.
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);

/// RFC 6749 §5.1 headers for token responses.
fn token_headers() -> [(HeaderName, HeaderValue); 2] {
    [
        (header::CACHE_CONTROL, HeaderValue::from_static("no-store")),
        (header::PRAGMA, HeaderValue::from_static("no-cache")),
    ]
}

/// Token request from a relying application.
#[derive(Default, Deserialize)]
pub struct TokenRequest {
    pub client_id: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub client_secret: Option<String>,
}

impl std::fmt::Debug for TokenRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRequest")
            .field("client_id", &self.client_id)
            .field("redirect_uri", &self.redirect_uri)
            .field("has_code", &self.code.is_some())
            .field("has_code_verifier", &self.code_verifier.is_some())
            .field("has_client_secret", &self.client_secret.is_some())
            .finish()
    }
}

/// Response relayed from the IdP, status and body untouched.
#[derive(Debug)]
pub struct UpstreamTokenResponse {
    pub status: StatusCode,
    pub content_type: Option<HeaderValue>,
    pub body: Bytes,
}

impl IntoResponse for UpstreamTokenResponse {
    fn into_response(self) -> Response {
        let mut response = (self.status, token_headers(), self.body).into_response();
        if let Some(content_type) = self.content_type {
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, content_type);
        }
        response
    }
}

/// Error body, shaped like RFC 6749 §5.2.
#[derive(Debug, Serialize)]
pub struct RelayErrorBody {
    pub error: &'static str,
    pub error_description: String,
}

/// Everything that can go wrong with one token request.
#[derive(Debug)]
pub enum RelayError {
    /// Missing or malformed caller input.
    BadRequest(String),
    /// Supplied `client_secret` does not match.
    AuthFailed,
    /// `client_id` is not the relying party's.
    Unauthorized,
    /// The assertion could not be built or signed.
    Signing(crate::Error),
    /// The IdP answered with a non-success status.
    Upstream(UpstreamTokenResponse),
    /// The IdP could not be reached, or did not answer in time.
    UpstreamUnreachable(String),
    /// The issued ID token is signed with an algorithm not accepted here.
    UnsupportedAlgorithm(String),
    /// A success response without a readable ID token.
    MalformedIdToken(String),
}

impl RelayError {
    pub fn error_code(&self) -> &'static str {
        match self {
            RelayError::BadRequest(_) => "invalid_request",
            RelayError::AuthFailed | RelayError::Unauthorized => "invalid_client",
            RelayError::Upstream(_) => "upstream_error",
            RelayError::Signing(_)
            | RelayError::UpstreamUnreachable(_)
            | RelayError::UnsupportedAlgorithm(_)
            | RelayError::MalformedIdToken(_) => "server_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::BadRequest(_) | RelayError::AuthFailed => StatusCode::BAD_REQUEST,
            RelayError::Unauthorized => StatusCode::UNAUTHORIZED,
            RelayError::Upstream(r) => r.status,
            RelayError::Signing(_)
            | RelayError::UpstreamUnreachable(_)
            | RelayError::UnsupportedAlgorithm(_)
            | RelayError::MalformedIdToken(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Caller-safe message. Never includes key material or upstream error
    /// chains.
    pub fn description(&self) -> String {
        match self {
            RelayError::BadRequest(msg) => msg.clone(),
            RelayError::AuthFailed => "Client authentication failed".into(),
            RelayError::Unauthorized => "Unauthorized client_id".into(),
            RelayError::Signing(_) => "Failed to sign client assertion".into(),
            RelayError::Upstream(r) => format!("Upstream responded with {}", r.status),
            RelayError::UpstreamUnreachable(_) => "Upstream token endpoint unreachable".into(),
            RelayError::UnsupportedAlgorithm(alg) => {
                format!("Unsupported signing algorithm: {}", alg)
            }
            RelayError::MalformedIdToken(_) => "Upstream response has no valid id_token".into(),
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        match self {
            RelayError::Upstream(r) => r.into_response(),
            other => {
                let body = RelayErrorBody {
                    error: other.error_code(),
                    error_description: other.description(),
                };
                (other.status_code(), token_headers(), Json(body)).into_response()
            }
        }
    }
}

impl std::fmt::Display for RelayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayError::Signing(e) => write!(f, "{}: {}", self.error_code(), e),
            RelayError::UpstreamUnreachable(detail) | RelayError::MalformedIdToken(detail) => {
                write!(f, "{}: {}", self.error_code(), detail)
            }
            _ => write!(f, "{}: {}", self.error_code(), self.description()),
        }
    }
}

impl std::error::Error for RelayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RelayError::Signing(e) => Some(e),
            _ => None,
        }
    }
}

/// Checks callers, signs assertions and talks to the IdP.
///
/// Holds only immutable state; one instance serves all requests.
pub struct TokenRelay {
    client_id: String,
    client_secret: Option<String>,
    token_endpoint_url: String,
    audience: Vec<String>,
    signing_alg: String,
    accepted_id_token_algs: Vec<String>,
    keys: Arc<KeyStore>,
    http: reqwest::Client,
}

impl TokenRelay {
    pub fn new(config: &Config, keys: Arc<KeyStore>) -> crate::Result<Self> {
        Ok(Self::with_client(config, keys, http_client(UPSTREAM_TIMEOUT)?))
    }

    /// Use a preconfigured HTTP client, e.g. one from [`http_client`] with
    /// another timeout.
    pub fn with_client(config: &Config, keys: Arc<KeyStore>, http: reqwest::Client) -> Self {
        Self {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            token_endpoint_url: config.token_endpoint_url(),
            audience: config.assertion_audience(),
            signing_alg: config.signing_alg.clone(),
            accepted_id_token_algs: config.accepted_id_token_algs.clone(),
            keys,
            http,
        }
    }

    /// Check the caller. First failure wins: missing `client_id`, then a
    /// mismatching secret, then a foreign `client_id`.
    pub fn authenticate(&self, request: &TokenRequest) -> Result<(), RelayError> {
        let client_id = request
            .client_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| RelayError::BadRequest("Missing client_id".into()))?;

        if let (Some(supplied), Some(expected)) = (&request.client_secret, &self.client_secret) {
            if !secrets_match(supplied, expected) {
                warn!(client_id, "client_secret mismatch");
                return Err(RelayError::AuthFailed);
            }
        }

        if client_id != self.client_id {
            warn!(client_id, "unknown client_id");
            return Err(RelayError::Unauthorized);
        }
        Ok(())
    }

    /// Exchange an authorization code at the IdP on the caller's behalf.
    #[instrument(skip_all, fields(client_id = request.client_id.as_deref().unwrap_or_default()))]
    pub async fn exchange(
        &self,
        request: TokenRequest,
    ) -> Result<UpstreamTokenResponse, RelayError> {
        self.authenticate(&request)?;

        let key = self
            .keys
            .active_key(&self.signing_alg)
            .map_err(RelayError::Signing)?;
        let assertion =
            assertion::issue(&self.client_id, &self.audience, key).map_err(RelayError::Signing)?;

        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", "authorization_code"),
            ("client_id", self.client_id.as_str()),
            ("client_assertion_type", CLIENT_ASSERTION_TYPE),
            ("client_assertion", assertion.token.as_str()),
        ];
        if let Some(code) = request.code.as_deref() {
            form.push(("code", code));
        }
        if let Some(redirect_uri) = request.redirect_uri.as_deref() {
            form.push(("redirect_uri", redirect_uri));
        }
        // PKCE is passed through, never required.
        if let Some(code_verifier) = request.code_verifier.as_deref() {
            form.push(("code_verifier", code_verifier));
        }

        debug!(url = %self.token_endpoint_url, jti = %assertion.jti, "forwarding token request");
        let response = self
            .http
            .post(&self.token_endpoint_url)
            .header(header::ACCEPT, "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "upstream request failed");
                RelayError::UpstreamUnreachable(e.to_string())
            })?;

        let status = response.status();
        let content_type = response.headers().get(header::CONTENT_TYPE).cloned();
        let body = response.bytes().await.map_err(|e| {
            error!(error = %e, "reading upstream response failed");
            RelayError::UpstreamUnreachable(e.to_string())
        })?;
        debug!(%status, body = %String::from_utf8_lossy(&body), "upstream response");

        let upstream = UpstreamTokenResponse {
            status,
            content_type,
            body,
        };
        if !status.is_success() {
            warn!(%status, "upstream rejected token request");
            return Err(RelayError::Upstream(upstream));
        }

        let alg = id_token_alg(&upstream.body)?;
        if !self.accepted_id_token_algs.iter().any(|a| *a == alg) {
            warn!(%alg, "id_token signed with unsupported algorithm");
            return Err(RelayError::UnsupportedAlgorithm(alg));
        }

        info!(%status, "token exchange succeeded");
        Ok(UpstreamTokenResponse {
            status: StatusCode::OK,
            ..upstream
        })
    }
}

/// Client for the IdP: one attempt within `timeout`, redirects are not
/// followed. A 3xx is relayed to the caller like any other non-2xx status.
pub fn http_client(timeout: Duration) -> crate::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::none())
        .build()?)
}

#[derive(Deserialize)]
struct IdTokenField {
    id_token: Option<String>,
}

/// `alg` from the header of the response's `id_token`.
fn id_token_alg(body: &[u8]) -> Result<String, RelayError> {
    let parsed: IdTokenField = serde_json::from_slice(body)
        .map_err(|e| RelayError::MalformedIdToken(format!("response is not JSON: {}", e)))?;
    let id_token = parsed
        .id_token
        .ok_or_else(|| RelayError::MalformedIdToken("response has no id_token".into()))?;
    let header = decode_header(&id_token)
        .map_err(|e| RelayError::MalformedIdToken(format!("id_token header: {}", e)))?;
    Ok(header.alg.into_owned())
}

fn secrets_match(supplied: &str, expected: &str) -> bool {
    // `memcmp::eq` needs equal lengths.
    supplied.len() == expected.len() && memcmp::eq(supplied.as_bytes(), expected.as_bytes())
}

#[cfg(test)]
mod tests {
    use crate::{
        config::KeyConfig,
        rsa::{RsaAlgorithm, RsaPrivateKey},
    };

    use super::*;

    fn relay(client_secret: Option<&str>) -> TokenRelay {
        let pem = RsaPrivateKey::generate(2048, RsaAlgorithm::RS256)
            .and_then(|k| k.private_key_to_pem_pkcs8())
            .unwrap();
        let config = Config {
            client_id: "rp1".into(),
            client_secret: client_secret.map(Into::into),
            idp_base_url: "https://idp.example.com".into(),
            token_endpoint: "/oauth2/token".into(),
            signing_alg: "RS256".into(),
            keys: vec![KeyConfig {
                algorithm: "RS256".into(),
                kid: "k1".into(),
                pem,
            }],
            accepted_id_token_algs: vec!["RS256".into()],
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            debug: false,
        };
        let keys = Arc::new(KeyStore::load(&config).unwrap());
        TokenRelay::new(&config, keys).unwrap()
    }

    fn request(client_id: Option<&str>, client_secret: Option<&str>) -> TokenRequest {
        TokenRequest {
            client_id: client_id.map(Into::into),
            client_secret: client_secret.map(Into::into),
            code: Some("abc".into()),
            redirect_uri: Some("https://cb".into()),
            ..Default::default()
        }
    }

    #[test]
    fn validation_order() {
        let relay = relay(Some("s3cret"));

        let err = relay.authenticate(&request(None, Some("wrong"))).unwrap_err();
        assert!(matches!(err, RelayError::BadRequest(ref m) if m == "Missing client_id"));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(matches!(
            relay.authenticate(&request(Some(""), None)),
            Err(RelayError::BadRequest(_))
        ));

        // Secret mismatch is reported before the client_id check.
        let err = relay
            .authenticate(&request(Some("other"), Some("wrong")))
            .unwrap_err();
        assert!(matches!(err, RelayError::AuthFailed));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(matches!(
            relay.authenticate(&request(Some("rp1"), Some("s3cret!"))),
            Err(RelayError::AuthFailed)
        ));

        let err = relay
            .authenticate(&request(Some("other"), Some("s3cret")))
            .unwrap_err();
        assert!(matches!(err, RelayError::Unauthorized));
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);

        assert!(relay.authenticate(&request(Some("rp1"), Some("s3cret"))).is_ok());
        // The secret is optional for callers.
        assert!(relay.authenticate(&request(Some("rp1"), None)).is_ok());
    }

    #[test]
    fn secret_ignored_when_none_configured() {
        let relay = relay(None);
        assert!(relay.authenticate(&request(Some("rp1"), Some("anything"))).is_ok());
        assert!(matches!(
            relay.authenticate(&request(Some("rp2"), Some("anything"))),
            Err(RelayError::Unauthorized)
        ));
    }

    #[test]
    fn id_token_header_inspection() {
        // {"alg":"RS256","typ":"JWT"} . {} . sig
        let rs256 = br#"{"access_token":"at","id_token":"eyJhbGciOiJSUzI1NiIsInR5cCI6IkpXVCJ9.e30.c2ln"}"#;
        assert_eq!(id_token_alg(rs256).unwrap(), "RS256");

        // {"alg":"HS256"}
        let hs256 = br#"{"id_token":"eyJhbGciOiJIUzI1NiJ9.e30.c2ln"}"#;
        assert_eq!(id_token_alg(hs256).unwrap(), "HS256");

        let malformed: [&[u8]; 3] = [
            b"not json",
            br#"{"access_token":"at"}"#,
            br#"{"id_token":"garbage"}"#,
        ];
        for body in malformed {
            assert!(matches!(
                id_token_alg(body),
                Err(RelayError::MalformedIdToken(_))
            ));
        }
    }

    #[test]
    fn error_descriptions_are_caller_safe() {
        let err = RelayError::UpstreamUnreachable("tcp connect error: 10.0.0.7:443".into());
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.description().contains("10.0.0.7"));
        assert!(err.to_string().contains("10.0.0.7"));

        let err = RelayError::UnsupportedAlgorithm("HS256".into());
        assert!(err.description().starts_with("Unsupported signing algorithm"));

        let err = RelayError::Signing(crate::Error::KeyNotFound("RS256".into()));
        assert_eq!(err.description(), "Failed to sign client assertion");
    }

    #[test]
    fn responses_are_not_cacheable() {
        let errors = [
            RelayError::BadRequest("Missing client_id".into()),
            RelayError::Unauthorized,
            RelayError::UpstreamUnreachable("timeout".into()),
            RelayError::Upstream(UpstreamTokenResponse {
                status: StatusCode::TEMPORARY_REDIRECT,
                content_type: None,
                body: Bytes::new(),
            }),
        ];
        for err in errors {
            let status = err.status_code();
            let resp = err.into_response();
            assert_eq!(resp.status(), status);
            assert_eq!(resp.headers()[header::CACHE_CONTROL], "no-store");
            assert_eq!(resp.headers()[header::PRAGMA], "no-cache");
        }
    }

    #[test]
    fn request_debug_hides_credentials() {
        let req = request(Some("rp1"), Some("s3cret"));
        let debug = format!("{:?}", req);
        assert!(!debug.contains("s3cret"));
        assert!(!debug.contains("abc"));
        assert!(debug.contains("rp1"));
    }
}
