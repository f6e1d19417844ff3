use openssl::pkey::{Id, PKey};
use smallvec::SmallVec;

use crate::{
    ecdsa::{EcdsaAlgorithm, EcdsaPrivateKey},
    jwk::Jwk,
    rsa::{RsaAlgorithm, RsaPrivateKey},
    Error, PublicKeyToJwk, Result, SigningKey,
};

/// A private key of any supported type.
#[non_exhaustive]
#[derive(Debug)]
pub enum SomePrivateKey {
    Rsa(RsaPrivateKey),
    Ecdsa(EcdsaPrivateKey),
}

impl SomePrivateKey {
    /// Parse a PEM private key for the named JWS algorithm.
    ///
    /// The key type must agree with the algorithm: an RSA key for `RS*` and
    /// `PS*`, an EC key on the matching curve for `ES*`.
    pub fn from_pem(pem: &[u8], alg: &str) -> Result<Self> {
        let pk = PKey::private_key_from_pem(pem)?;
        if let Ok(rsa_alg) = RsaAlgorithm::from_name(alg) {
            if pk.id() != Id::RSA {
                return Err(Error::UnsupportedOrInvalidKey);
            }
            return Ok(Self::Rsa(RsaPrivateKey::from_pkey(pk, rsa_alg)?));
        }

        let ec_alg = EcdsaAlgorithm::from_name(alg)?;
        if pk.id() != Id::EC {
            return Err(Error::UnsupportedOrInvalidKey);
        }
        let k = EcdsaPrivateKey::from_pkey(pk)?;
        if k.algorithm() != ec_alg {
            return Err(Error::UnsupportedOrInvalidKey);
        }
        Ok(Self::Ecdsa(k))
    }
}

impl SigningKey for SomePrivateKey {
    fn sign(&self, v: &[u8]) -> Result<SmallVec<[u8; 64]>> {
        match self {
            SomePrivateKey::Rsa(k) => k.sign(v),
            SomePrivateKey::Ecdsa(k) => k.sign(v),
        }
    }

    fn alg(&self) -> &'static str {
        match self {
            SomePrivateKey::Rsa(k) => k.alg(),
            SomePrivateKey::Ecdsa(k) => k.alg(),
        }
    }
}

impl PublicKeyToJwk for SomePrivateKey {
    fn public_key_to_jwk(&self) -> Result<Jwk> {
        match self {
            SomePrivateKey::Rsa(k) => k.public_key_to_jwk(),
            SomePrivateKey::Ecdsa(k) => k.public_key_to_jwk(),
        }
    }
}

/// Names of every algorithm [`SomePrivateKey`] can sign with, RSA first.
pub fn supported_algs() -> impl Iterator<Item = &'static str> {
    RsaAlgorithm::ALL
        .into_iter()
        .map(RsaAlgorithm::name)
        .chain(EcdsaAlgorithm::ALL.into_iter().map(EcdsaAlgorithm::name))
}

/// Whether `alg` names an algorithm [`SomePrivateKey`] can sign with.
pub fn is_supported_alg(alg: &str) -> bool {
    supported_algs().any(|name| name == alg)
}
