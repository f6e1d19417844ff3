//! RSA signing keys, PKCS#1 v1.5 (`RS*`) and PSS (`PS*`).
use openssl::{
    bn::BigNum,
    hash::MessageDigest,
    pkey::{PKey, Private, Public},
    rsa::{Padding, Rsa},
    sign::{RsaPssSaltlen, Signer, Verifier},
};
use smallvec::SmallVec;

use crate::{
    jwk::Jwk, url_safe_trailing_bits, Error, PublicKeyToJwk, Result, SigningKey, VerificationKey,
};

/// Keys shorter than this are refused.
pub const MIN_RSA_BITS: u32 = 2048;

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RsaAlgorithm {
    RS256,
    RS384,
    RS512,
    PS256,
    PS384,
    PS512,
}

impl RsaAlgorithm {
    pub const ALL: [RsaAlgorithm; 6] = [
        Self::RS256,
        Self::RS384,
        Self::RS512,
        Self::PS256,
        Self::PS384,
        Self::PS512,
    ];

    pub fn from_name(name: &str) -> Result<Self> {
        use RsaAlgorithm::*;
        Ok(match name {
            "RS256" => RS256,
            "RS384" => RS384,
            "RS512" => RS512,
            "PS256" => PS256,
            "PS384" => PS384,
            "PS512" => PS512,
            _ => return Err(Error::UnsupportedAlgorithm(name.into())),
        })
    }

    pub fn name(self) -> &'static str {
        use RsaAlgorithm::*;
        match self {
            RS256 => "RS256",
            RS384 => "RS384",
            RS512 => "RS512",
            PS256 => "PS256",
            PS384 => "PS384",
            PS512 => "PS512",
        }
    }

    fn is_pss(self) -> bool {
        use RsaAlgorithm::*;
        matches!(self, PS256 | PS384 | PS512)
    }

    fn digest(self) -> MessageDigest {
        use RsaAlgorithm::*;
        match self {
            RS256 | PS256 => MessageDigest::sha256(),
            RS384 | PS384 => MessageDigest::sha384(),
            RS512 | PS512 => MessageDigest::sha512(),
        }
    }
}

pub struct RsaPrivateKey {
    private_key: PKey<Private>,
    algorithm: RsaAlgorithm,
}

impl std::fmt::Debug for RsaPrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RsaPrivateKey")
            .field("algorithm", &self.algorithm)
            .field("bits", &self.private_key.bits())
            .finish_non_exhaustive()
    }
}

impl RsaPrivateKey {
    /// Recommended bits >= 2048.
    pub fn generate(bits: u32, algorithm: RsaAlgorithm) -> Result<Self> {
        Ok(Self {
            private_key: PKey::from_rsa(Rsa::generate(bits)?)?,
            algorithm,
        })
    }

    pub(crate) fn from_pkey(pk: PKey<Private>, algorithm: RsaAlgorithm) -> Result<Self> {
        let rsa = pk.rsa().map_err(|_| Error::UnsupportedOrInvalidKey)?;
        if !rsa.check_key()? || pk.bits() < MIN_RSA_BITS {
            return Err(Error::UnsupportedOrInvalidKey);
        }
        Ok(Self {
            private_key: pk,
            algorithm,
        })
    }

    /// Accepts both `BEGIN PRIVATE KEY` and `BEGIN RSA PRIVATE KEY`.
    pub fn from_pem(pem: &[u8], algorithm: RsaAlgorithm) -> Result<Self> {
        Self::from_pkey(PKey::private_key_from_pem(pem)?, algorithm)
    }

    #[inline]
    pub fn algorithm(&self) -> RsaAlgorithm {
        self.algorithm
    }

    pub fn private_key_to_pem_pkcs8(&self) -> Result<Vec<u8>> {
        Ok(self.private_key.private_key_to_pem_pkcs8()?)
    }

    pub fn public_key(&self) -> Result<RsaPublicKey> {
        let rsa = self.private_key.rsa()?;
        let pk = RsaPublicKey::from_components(&rsa.n().to_vec(), &rsa.e().to_vec())?;
        Ok(pk.with_algorithm(self.algorithm))
    }
}

impl SigningKey for RsaPrivateKey {
    fn sign(&self, v: &[u8]) -> Result<SmallVec<[u8; 64]>> {
        let mut signer = Signer::new(self.algorithm.digest(), self.private_key.as_ref())?;
        if self.algorithm.is_pss() {
            signer.set_rsa_padding(Padding::PKCS1_PSS)?;
            signer.set_rsa_pss_saltlen(RsaPssSaltlen::DIGEST_LENGTH)?;
        }
        signer.update(v)?;
        Ok(signer.sign_to_vec()?.into())
    }

    #[inline]
    fn alg(&self) -> &'static str {
        self.algorithm.name()
    }
}

impl PublicKeyToJwk for RsaPrivateKey {
    fn public_key_to_jwk(&self) -> Result<Jwk> {
        self.public_key()?.public_key_to_jwk()
    }
}

#[derive(Debug)]
pub struct RsaPublicKey {
    public_key: PKey<Public>,
    // When absent, any RS*/PS* algorithm is accepted.
    algorithm: Option<RsaAlgorithm>,
}

impl RsaPublicKey {
    pub fn from_components(n: &[u8], e: &[u8]) -> Result<Self> {
        let rsa = Rsa::from_public_components(BigNum::from_slice(n)?, BigNum::from_slice(e)?)?;
        Ok(Self {
            public_key: PKey::from_rsa(rsa)?,
            algorithm: None,
        })
    }

    /// Pin this key to a single algorithm.
    pub fn with_algorithm(mut self, algorithm: RsaAlgorithm) -> Self {
        self.algorithm = Some(algorithm);
        self
    }

    pub fn n(&self) -> Result<Vec<u8>> {
        Ok(self.public_key.rsa()?.n().to_vec())
    }

    pub fn e(&self) -> Result<Vec<u8>> {
        Ok(self.public_key.rsa()?.e().to_vec())
    }
}

impl PublicKeyToJwk for RsaPublicKey {
    fn public_key_to_jwk(&self) -> Result<Jwk> {
        Ok(Jwk {
            kty: "RSA".into(),
            use_: Some("sig".into()),
            alg: self.algorithm.map(|alg| alg.name().into()),
            n: Some(base64::encode_config(self.n()?, url_safe_trailing_bits())),
            e: Some(base64::encode_config(self.e()?, url_safe_trailing_bits())),
            ..Jwk::default()
        })
    }
}

impl VerificationKey for RsaPublicKey {
    fn verify(&self, v: &[u8], sig: &[u8], alg: &str) -> Result<()> {
        let alg = RsaAlgorithm::from_name(alg).map_err(|_| Error::VerificationError)?;
        if matches!(self.algorithm, Some(pinned) if pinned != alg) {
            return Err(Error::VerificationError);
        }

        let mut verifier = Verifier::new(alg.digest(), self.public_key.as_ref())?;
        if alg.is_pss() {
            verifier.set_rsa_padding(Padding::PKCS1_PSS)?;
            verifier.set_rsa_pss_saltlen(RsaPssSaltlen::DIGEST_LENGTH)?;
        }
        if verifier.verify_oneshot(sig, v)? {
            Ok(())
        } else {
            Err(Error::VerificationError)
        }
    }
}
