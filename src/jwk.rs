//! JWK and JWK Set.
use std::collections::HashMap;

use openssl::sha::sha256;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_with::skip_serializing_none;
use smallvec::SmallVec;

use crate::{
    decode_header,
    ecdsa::{EcdsaAlgorithm, EcdsaPublicKey},
    rsa::{RsaAlgorithm, RsaPublicKey},
    url_safe_trailing_bits, verify, Error, HeaderAndClaims, PublicKeyToJwk, Result, SigningKey,
    VerificationKey,
};

/// A public JSON Web Key (RFC 7517), RSA or EC.
#[skip_serializing_none]
#[non_exhaustive]
#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
pub struct Jwk {
    pub kty: String,
    #[serde(rename = "use")]
    pub use_: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_ops: Vec<String>,
    pub alg: Option<String>,
    pub crv: Option<String>,
    pub kid: Option<String>,

    // RSA
    pub n: Option<String>,
    pub e: Option<String>,
    // EC
    pub x: Option<String>,
    pub y: Option<String>,
}

fn decode_member(v: &str) -> Result<Vec<u8>> {
    Ok(base64::decode_config(v, url_safe_trailing_bits())?)
}

impl Jwk {
    /// Whether `use` and `key_ops` allow signature verification.
    fn is_for_verification(&self) -> bool {
        let use_ok = matches!(self.use_.as_deref(), None | Some("sig"));
        let ops_ok = self.key_ops.is_empty() || self.key_ops.iter().any(|op| op == "verify");
        use_ok && ops_ok
    }

    pub fn to_verification_key(&self) -> Result<Box<dyn VerificationKey + Send + Sync>> {
        if !self.is_for_verification() {
            return Err(Error::UnsupportedOrInvalidKey);
        }
        match self.kty.as_str() {
            "RSA" => Ok(Box::new(self.to_rsa()?)),
            "EC" => Ok(Box::new(self.to_ecdsa()?)),
            _ => Err(Error::UnsupportedOrInvalidKey),
        }
    }

    fn to_rsa(&self) -> Result<RsaPublicKey> {
        let (Some(n), Some(e)) = (&self.n, &self.e) else {
            return Err(Error::UnsupportedOrInvalidKey);
        };
        let k = RsaPublicKey::from_components(&decode_member(n)?, &decode_member(e)?)?;
        // A published `alg` pins the key to it.
        match self.alg.as_deref() {
            Some(alg) => Ok(k.with_algorithm(RsaAlgorithm::from_name(alg)?)),
            None => Ok(k),
        }
    }

    fn to_ecdsa(&self) -> Result<EcdsaPublicKey> {
        let (Some(crv), Some(x), Some(y)) = (&self.crv, &self.x, &self.y) else {
            return Err(Error::UnsupportedOrInvalidKey);
        };
        let algorithm = EcdsaAlgorithm::from_curve_name(crv)?;
        if self.alg.as_deref().map_or(false, |alg| alg != algorithm.name()) {
            return Err(Error::UnsupportedOrInvalidKey);
        }
        EcdsaPublicKey::from_coordinates(&decode_member(x)?, &decode_member(y)?, algorithm)
    }
}

/// JWK Set Representation.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

impl JwkSet {
    /// Base64url SHA-256 of the serialized set.
    ///
    /// Serialization follows field declaration order and key order, so equal
    /// sets always hash equally, in any process.
    pub fn content_hash(&self) -> Result<String> {
        let json = serde_json::to_vec(self)?;
        Ok(base64::encode_config(sha256(&json), base64::URL_SAFE_NO_PAD))
    }

    /// Strong HTTP entity tag derived from [`JwkSet::content_hash`].
    pub fn etag(&self) -> Result<String> {
        Ok(format!("\"{}\"", self.content_hash()?))
    }

    /// Keys without a `kid`, or that cannot verify signatures, are left out.
    pub fn verifier(&self) -> JwkSetVerifier {
        let keys = self
            .keys
            .iter()
            .filter_map(|jwk| {
                let kid = jwk.kid.clone()?;
                jwk.to_verification_key().ok().map(|k| (kid, k))
            })
            .collect();
        JwkSetVerifier { keys }
    }
}

/// Verification keys of a [`JwkSet`] by `kid`.
pub struct JwkSetVerifier {
    keys: HashMap<String, Box<dyn VerificationKey + Send + Sync>>,
}

impl JwkSetVerifier {
    pub fn find(&self, kid: &str) -> Option<&dyn VerificationKey> {
        self.keys.get(kid).map(|vk| &**vk as &dyn VerificationKey)
    }

    /// Verify `token` with the key its `kid` header names, then check `exp`
    /// and `nbf`.
    pub fn verify<ExtraClaims: DeserializeOwned>(
        &self,
        token: &str,
    ) -> Result<HeaderAndClaims<ExtraClaims>> {
        let kid = decode_header(token)?.kid.ok_or(Error::NoKid)?;
        verify(token, self.find(&kid).ok_or(Error::NoKey)?)
    }
}

/// A signing key with a key id.
///
/// The id is put in the `kid` header of every token it signs and in the JWK
/// it publishes.
pub struct WithKid<K> {
    kid: String,
    inner: K,
}

impl<K> WithKid<K> {
    pub fn new(kid: String, inner: K) -> Self {
        Self { kid, inner }
    }

    #[inline]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    #[inline]
    pub fn inner(&self) -> &K {
        &self.inner
    }
}

impl<K: std::fmt::Debug> std::fmt::Debug for WithKid<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WithKid")
            .field("kid", &self.kid)
            .field("inner", &self.inner)
            .finish()
    }
}

impl<K: SigningKey> SigningKey for WithKid<K> {
    #[inline]
    fn alg(&self) -> &'static str {
        self.inner.alg()
    }

    #[inline]
    fn kid(&self) -> Option<&str> {
        Some(&self.kid)
    }

    #[inline]
    fn sign(&self, v: &[u8]) -> Result<SmallVec<[u8; 64]>> {
        self.inner.sign(v)
    }
}

impl<K: PublicKeyToJwk> PublicKeyToJwk for WithKid<K> {
    fn public_key_to_jwk(&self) -> Result<Jwk> {
        let mut jwk = self.inner.public_key_to_jwk()?;
        jwk.kid = Some(self.kid.clone());
        Ok(jwk)
    }
}
