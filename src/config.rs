//! Startup configuration.
//!
//! Everything is read once, from the process environment, into a [`Config`]
//! that the rest of the crate receives by reference. Request handling never
//! looks at the environment.
use std::{fmt, net::SocketAddr, path::PathBuf};

use crate::{is_supported_alg, supported_algs, Error, Result};

pub const DEFAULT_TOKEN_ENDPOINT: &str = "/oauth2/token";
pub const DEFAULT_SIGNING_ALG: &str = "RS256";
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3000";

/// PEM private key and key id for one algorithm.
#[derive(Clone)]
pub struct KeyConfig {
    pub algorithm: String,
    pub kid: String,
    pub pem: Vec<u8>,
}

impl fmt::Debug for KeyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyConfig")
            .field("algorithm", &self.algorithm)
            .field("kid", &self.kid)
            .field("pem", &"<redacted>")
            .finish()
    }
}

#[derive(Clone)]
pub struct Config {
    /// Relying-party identity. `iss` and `sub` of every assertion, and the
    /// only `client_id` accepted from callers.
    pub client_id: String,
    /// Shared secret callers may present.
    pub client_secret: Option<String>,
    /// IdP base URL, without a trailing slash.
    pub idp_base_url: String,
    /// Token endpoint path on the IdP, starting with `/`.
    pub token_endpoint: String,
    /// Algorithm of the key used for client assertions.
    pub signing_alg: String,
    pub keys: Vec<KeyConfig>,
    /// `alg` values accepted on ID tokens returned by the IdP.
    pub accepted_id_token_algs: Vec<String>,
    pub listen_addr: SocketAddr,
    pub debug: bool,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("idp_base_url", &self.idp_base_url)
            .field("token_endpoint", &self.token_endpoint)
            .field("signing_alg", &self.signing_alg)
            .field("keys", &self.keys)
            .field("accepted_id_token_algs", &self.accepted_id_token_algs)
            .field("listen_addr", &self.listen_addr)
            .field("debug", &self.debug)
            .finish()
    }
}

impl Config {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from any variable source. Empty values count as
    /// unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let require =
            |name: &str| get(name).ok_or_else(|| Error::Config(format!("{} is required", name)));

        let client_id = require("CLIENT_ID")?;
        let client_secret = get("CLIENT_SECRET");
        let idp_base_url = normalize_base_url(&require("IDP_DOMAIN")?);

        let token_endpoint = get("TOKEN_ENDPOINT").unwrap_or_else(|| DEFAULT_TOKEN_ENDPOINT.into());
        let token_endpoint = if token_endpoint.starts_with('/') {
            token_endpoint
        } else {
            format!("/{}", token_endpoint)
        };

        let signing_alg = get("SIGNING_ALG").unwrap_or_else(|| DEFAULT_SIGNING_ALG.into());
        if !is_supported_alg(&signing_alg) {
            return Err(Error::Config(format!(
                "SIGNING_ALG {} is not supported",
                signing_alg
            )));
        }

        let mut keys = Vec::new();
        for alg in supported_algs() {
            let pem = match (
                get(&format!("PRIVATE_KEY_{}", alg)),
                get(&format!("PRIVATE_KEY_{}_FILE", alg)),
            ) {
                (Some(_), Some(_)) => {
                    return Err(Error::Config(format!(
                        "set only one of PRIVATE_KEY_{alg} and PRIVATE_KEY_{alg}_FILE"
                    )))
                }
                (Some(inline), None) => inline.replace("\\n", "\n").into_bytes(),
                (None, Some(path)) => {
                    let path = PathBuf::from(path);
                    std::fs::read(&path).map_err(|e| {
                        Error::Config(format!("cannot read {}: {}", path.display(), e))
                    })?
                }
                (None, None) => continue,
            };
            let kid = require(&format!("KEY_ID_{}", alg))?;
            keys.push(KeyConfig {
                algorithm: alg.into(),
                kid,
                pem,
            });
        }
        if keys.is_empty() {
            return Err(Error::Config(format!(
                "no signing key configured, set PRIVATE_KEY_{} or PRIVATE_KEY_{}_FILE",
                signing_alg, signing_alg
            )));
        }

        let accepted_id_token_algs: Vec<String> = get("ACCEPTED_ID_TOKEN_ALGS")
            .unwrap_or_else(|| "RS256".into())
            .split(',')
            .map(|alg| alg.trim().to_string())
            .filter(|alg| !alg.is_empty())
            .collect();
        if accepted_id_token_algs.iter().any(|alg| alg == "none") {
            return Err(Error::Config(
                "ACCEPTED_ID_TOKEN_ALGS must not contain none".into(),
            ));
        }

        let listen_addr: SocketAddr = get("LISTEN_ADDR")
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.into())
            .parse()
            .map_err(|e| Error::Config(format!("LISTEN_ADDR: {}", e)))?;

        let debug = match get("DEBUG").as_deref() {
            None => false,
            Some(v) => parse_bool(v)
                .ok_or_else(|| Error::Config(format!("DEBUG: expected a boolean, got {}", v)))?,
        };

        Ok(Self {
            client_id,
            client_secret,
            idp_base_url,
            token_endpoint,
            signing_alg,
            keys,
            accepted_id_token_algs,
            listen_addr,
            debug,
        })
    }

    /// Full URL of the IdP token endpoint.
    pub fn token_endpoint_url(&self) -> String {
        format!("{}{}", self.idp_base_url, self.token_endpoint)
    }

    /// `aud` of every client assertion: the IdP itself and its token endpoint.
    pub fn assertion_audience(&self) -> Vec<String> {
        vec![self.idp_base_url.clone(), self.token_endpoint_url()]
    }
}

/// A bare domain gets `https://`; full URLs are kept as given.
fn normalize_base_url(domain: &str) -> String {
    let url = if domain.contains("://") {
        domain.to_string()
    } else {
        format!("https://{}", domain)
    };
    url.trim_end_matches('/').to_string()
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
