//! Signing keys, loaded once at startup.
use std::collections::{BTreeMap, HashSet};

use tracing::info;

use crate::{
    config::Config,
    jwk::{JwkSet, WithKid},
    Error, PublicKeyToJwk, Result, SigningKey, SomePrivateKey,
};

/// The relying party's private keys, one per algorithm, and the public JWK
/// Set derived from them.
///
/// Immutable after [`KeyStore::load`], so it can be shared between requests
/// without locking.
#[derive(Debug)]
pub struct KeyStore {
    keys: BTreeMap<&'static str, WithKid<SomePrivateKey>>,
    jwks: JwkSet,
    etag: String,
}

impl KeyStore {
    /// Parse every configured key.
    ///
    /// Fails with [`Error::Config`] on an unparsable key, a key that does not
    /// fit its algorithm, an empty or repeated key id, or when the assertion
    /// algorithm has no key.
    pub fn load(config: &Config) -> Result<Self> {
        let mut keys = Vec::with_capacity(config.keys.len());
        for k in &config.keys {
            let key = SomePrivateKey::from_pem(&k.pem, &k.algorithm).map_err(|e| {
                Error::Config(format!("private key for {}: {}", k.algorithm, e))
            })?;
            keys.push(WithKid::new(k.kid.clone(), key));
        }
        let store = Self::from_keys(keys)?;

        if let Err(e) = store.active_key(&config.signing_alg) {
            return Err(Error::Config(e.to_string()));
        }
        for (alg, k) in &store.keys {
            info!(alg = *alg, kid = k.kid(), "loaded signing key");
        }
        Ok(store)
    }

    /// Build a store from already parsed keys.
    pub fn from_keys(keys: Vec<WithKid<SomePrivateKey>>) -> Result<Self> {
        let mut by_alg = BTreeMap::new();
        let mut kids = HashSet::new();
        for k in keys {
            if k.kid().is_empty() {
                return Err(Error::Config(format!("empty key id for {}", k.alg())));
            }
            if !kids.insert(k.kid().to_string()) {
                return Err(Error::Config(format!("duplicate key id {}", k.kid())));
            }
            let alg = k.alg();
            if by_alg.insert(alg, k).is_some() {
                return Err(Error::Config(format!("more than one key for {}", alg)));
            }
        }

        // BTreeMap order keeps the published set stable.
        let jwks = JwkSet {
            keys: by_alg
                .values()
                .map(|k| k.public_key_to_jwk())
                .collect::<Result<_>>()?,
        };
        let etag = jwks.etag()?;

        Ok(Self {
            keys: by_alg,
            jwks,
            etag,
        })
    }

    /// The key that signs with `alg`.
    pub fn active_key(&self, alg: &str) -> Result<&WithKid<SomePrivateKey>> {
        self.keys
            .get(alg)
            .ok_or_else(|| Error::KeyNotFound(alg.to_string()))
    }

    #[inline]
    pub fn public_key_set(&self) -> &JwkSet {
        &self.jwks
    }

    /// Entity tag of [`KeyStore::public_key_set`], computed at load.
    #[inline]
    pub fn etag(&self) -> &str {
        &self.etag
    }
}
