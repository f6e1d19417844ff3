//! HTTP surface: `POST /token` and `GET /.well-known/keys`.
use std::sync::Arc;

use axum::{
    async_trait,
    body::Body,
    extract::{FromRequest, Request, State},
    http::{header, HeaderMap},
    response::Response,
    routing::{get, post},
    Form, Json, Router,
};
use serde::de::DeserializeOwned;

use crate::{
    config::Config,
    key_store::KeyStore,
    publisher,
    relay::{RelayError, TokenRelay, TokenRequest, UpstreamTokenResponse},
    Result,
};

pub const TOKEN_PATH: &str = "/token";
pub const JWKS_PATH: &str = "/.well-known/keys";

/// Shared by all request handlers. Read-only.
pub struct AppState {
    pub keys: Arc<KeyStore>,
    pub relay: TokenRelay,
}

impl AppState {
    /// Load keys and build the relay. Any failure here is fatal.
    pub fn new(config: &Config) -> Result<Self> {
        let keys = Arc::new(KeyStore::load(config)?);
        let relay = TokenRelay::new(config, keys.clone())?;
        Ok(Self { keys, relay })
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(TOKEN_PATH, post(token_handler))
        .route(JWKS_PATH, get(jwks_handler))
        .with_state(state)
}

/// POST /token
async fn token_handler(
    State(state): State<Arc<AppState>>,
    FormOrJson(request): FormOrJson<TokenRequest>,
) -> std::result::Result<UpstreamTokenResponse, RelayError> {
    state.relay.exchange(request).await
}

/// GET /.well-known/keys
async fn jwks_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    publisher::publish(&state.keys, &headers)
}

/// Largest token request body read.
const MAX_BODY: usize = 64 * 1024;

#[derive(Clone, Copy)]
enum BodyKind {
    Json,
    Form,
}

fn body_kind(headers: &HeaderMap) -> Option<BodyKind> {
    let mime = headers
        .get(header::CONTENT_TYPE)?
        .to_str()
        .ok()?
        .split(';')
        .next()?
        .trim()
        .to_ascii_lowercase();
    if mime == "application/json" || mime.ends_with("+json") {
        Some(BodyKind::Json)
    } else if mime == "application/x-www-form-urlencoded" {
        Some(BodyKind::Form)
    } else {
        None
    }
}

/// A JSON or urlencoded form body, chosen by `Content-Type`.
///
/// An empty body, or one of any other type, carries no parameters and yields
/// `T::default()`, so the request is judged by what is missing from it.
pub struct FormOrJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for FormOrJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Default,
{
    type Rejection = RelayError;

    async fn from_request(req: Request, state: &S) -> std::result::Result<Self, Self::Rejection> {
        let Some(kind) = body_kind(req.headers()) else {
            return Ok(Self(T::default()));
        };

        let (parts, body) = req.into_parts();
        let bytes = axum::body::to_bytes(body, MAX_BODY)
            .await
            .map_err(|_| RelayError::BadRequest("Unreadable request body".into()))?;
        if bytes.is_empty() {
            return Ok(Self(T::default()));
        }
        let req = Request::from_parts(parts, Body::from(bytes));

        match kind {
            BodyKind::Json => {
                let Json(v) = Json::<T>::from_request(req, state).await.map_err(|e| {
                    RelayError::BadRequest(format!("Malformed JSON body: {}", e.body_text()))
                })?;
                Ok(Self(v))
            }
            BodyKind::Form => {
                let Form(v) = Form::<T>::from_request(req, state).await.map_err(|e| {
                    RelayError::BadRequest(format!("Malformed form body: {}", e.body_text()))
                })?;
                Ok(Self(v))
            }
        }
    }
}
