#![allow(dead_code)]

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use assertion_relay::{
    config::Config,
    ecdsa::{EcdsaAlgorithm, EcdsaPrivateKey},
    rsa::{RsaAlgorithm, RsaPrivateKey},
    server::{router, AppState},
};
use axum::{
    body::Body,
    http::{header, Response, StatusCode},
    response::Redirect,
    routing::post,
    Form, Router,
};

pub const CLIENT_ID: &str = "rp1";
pub const CLIENT_SECRET: &str = "s3cret";
pub const RSA_KID: &str = "rsa-1";
pub const EC_KID: &str = "ec-1";

fn pem_string(pem: Vec<u8>) -> String {
    String::from_utf8(pem).unwrap()
}

/// Configuration with an RS256 and an ES256 key, pointed at `idp`.
pub fn config(idp: &str, client_secret: Option<&str>) -> Config {
    let rsa = RsaPrivateKey::generate(2048, RsaAlgorithm::RS256)
        .and_then(|k| k.private_key_to_pem_pkcs8())
        .unwrap();
    let ec = EcdsaPrivateKey::generate(EcdsaAlgorithm::ES256)
        .and_then(|k| k.private_key_to_pem_pkcs8())
        .unwrap();

    let mut vars: HashMap<&str, String> = HashMap::new();
    vars.insert("CLIENT_ID", CLIENT_ID.into());
    vars.insert("IDP_DOMAIN", idp.into());
    vars.insert("PRIVATE_KEY_RS256", pem_string(rsa));
    vars.insert("KEY_ID_RS256", RSA_KID.into());
    vars.insert("PRIVATE_KEY_ES256", pem_string(ec));
    vars.insert("KEY_ID_ES256", EC_KID.into());
    if let Some(secret) = client_secret {
        vars.insert("CLIENT_SECRET", secret.into());
    }

    Config::from_lookup(|name| vars.get(name).cloned()).unwrap()
}

pub fn app(config: &Config) -> (Router, Arc<AppState>) {
    let state = Arc::new(AppState::new(config).unwrap());
    (router(state.clone()), state)
}

pub async fn body_bytes(resp: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

pub async fn body_json(resp: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(resp).await).unwrap()
}

/// A fake IdP token endpoint that records every form it receives and always
/// answers with the same status and JSON body.
pub struct StubIdp {
    pub addr: SocketAddr,
    pub received: Arc<Mutex<Vec<HashMap<String, String>>>>,
}

impl StubIdp {
    pub async fn start(status: StatusCode, body: &'static str) -> Self {
        let received = Arc::new(Mutex::new(Vec::new()));
        let recorder = received.clone();
        let app = Router::new().route(
            "/oauth2/token",
            post(move |Form(form): Form<HashMap<String, String>>| {
                recorder.lock().unwrap().push(form);
                async move { (status, [(header::CONTENT_TYPE, "application/json")], body) }
            }),
        );

        Self {
            addr: spawn(app).await,
            received,
        }
    }

    /// A token endpoint that answers 307 to `/elsewhere`. Only forms posted to
    /// `/elsewhere` are recorded.
    pub async fn redirecting() -> Self {
        let received = Arc::new(Mutex::new(Vec::new()));
        let recorder = received.clone();
        let app = Router::new()
            .route(
                "/oauth2/token",
                post(|| async { Redirect::temporary("/elsewhere") }),
            )
            .route(
                "/elsewhere",
                post(move |Form(form): Form<HashMap<String, String>>| {
                    recorder.lock().unwrap().push(form);
                    async move { (StatusCode::OK, [(header::CONTENT_TYPE, "application/json")], "{}") }
                }),
            );
        Self {
            addr: spawn(app).await,
            received,
        }
    }

    /// A token endpoint that accepts requests and never answers.
    pub async fn silent() -> Self {
        let app = Router::new().route(
            "/oauth2/token",
            post(|| std::future::pending::<StatusCode>()),
        );
        Self {
            addr: spawn(app).await,
            received: Arc::default(),
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<HashMap<String, String>> {
        self.received.lock().unwrap().clone()
    }
}

async fn spawn(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// An address nothing listens on.
pub async fn closed_port() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}
