//! ECDSA signing keys over the NIST curves.
use openssl::{
    bn::{BigNum, BigNumContext},
    ec::{EcGroup, EcKey},
    ecdsa::EcdsaSig,
    hash::MessageDigest,
    nid::Nid,
    pkey::{HasPublic, PKey, Private, Public},
    sign::{Signer, Verifier},
};
use smallvec::SmallVec;

use crate::{
    jwk::Jwk, url_safe_trailing_bits, Error, PublicKeyToJwk, Result, SigningKey, VerificationKey,
};

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EcdsaAlgorithm {
    ES256,
    ES384,
    ES512,
}

/// What each algorithm fixes: curve, hash and sizes.
struct Params {
    alg: &'static str,
    crv: &'static str,
    curve: Nid,
    digest: fn() -> MessageDigest,
    /// Bytes in a coordinate, and in each of `r` and `s`.
    field_len: usize,
}

impl EcdsaAlgorithm {
    pub const ALL: [EcdsaAlgorithm; 3] = [Self::ES256, Self::ES384, Self::ES512];

    fn params(self) -> Params {
        match self {
            EcdsaAlgorithm::ES256 => Params {
                alg: "ES256",
                crv: "P-256",
                curve: Nid::X9_62_PRIME256V1,
                digest: MessageDigest::sha256,
                field_len: 32,
            },
            EcdsaAlgorithm::ES384 => Params {
                alg: "ES384",
                crv: "P-384",
                curve: Nid::SECP384R1,
                digest: MessageDigest::sha384,
                field_len: 48,
            },
            EcdsaAlgorithm::ES512 => Params {
                alg: "ES512",
                crv: "P-521",
                curve: Nid::SECP521R1,
                digest: MessageDigest::sha512,
                field_len: 66,
            },
        }
    }

    fn find(pred: impl Fn(&Params) -> bool) -> Option<Self> {
        Self::ALL.into_iter().find(|a| pred(&a.params()))
    }

    pub fn from_name(name: &str) -> Result<Self> {
        Self::find(|p| p.alg == name).ok_or_else(|| Error::UnsupportedAlgorithm(name.into()))
    }

    pub fn name(self) -> &'static str {
        self.params().alg
    }

    /// JWK `crv` name.
    pub(crate) fn from_curve_name(crv: &str) -> Result<Self> {
        Self::find(|p| p.crv == crv).ok_or(Error::UnsupportedOrInvalidKey)
    }

    fn from_curve(curve: Nid) -> Result<Self> {
        Self::find(|p| p.curve == curve).ok_or(Error::UnsupportedOrInvalidKey)
    }

    fn group(self) -> Result<EcGroup> {
        Ok(EcGroup::from_curve_name(self.params().curve)?)
    }

    fn digest(self) -> MessageDigest {
        (self.params().digest)()
    }

    fn field_len(self) -> usize {
        self.params().field_len
    }

    /// Length of a JWS signature, `r || s`.
    pub fn signature_len(self) -> usize {
        2 * self.field_len()
    }
}

pub struct EcdsaPrivateKey {
    private_key: PKey<Private>,
    algorithm: EcdsaAlgorithm,
}

// Only the curve. The scalar stays out of logs.
impl std::fmt::Debug for EcdsaPrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EcdsaPrivateKey")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl EcdsaPrivateKey {
    pub fn generate(algorithm: EcdsaAlgorithm) -> Result<Self> {
        let group = algorithm.group()?;
        let ec = EcKey::generate(&group)?;
        Ok(Self {
            private_key: PKey::from_ec_key(ec)?,
            algorithm,
        })
    }

    /// The algorithm follows from the key's curve.
    pub(crate) fn from_pkey(private_key: PKey<Private>) -> Result<Self> {
        let ec = private_key
            .ec_key()
            .map_err(|_| Error::UnsupportedOrInvalidKey)?;
        ec.check_key()?;
        let algorithm = ec
            .group()
            .curve_name()
            .ok_or(Error::UnsupportedOrInvalidKey)
            .and_then(EcdsaAlgorithm::from_curve)?;
        Ok(Self {
            private_key,
            algorithm,
        })
    }

    /// Accepts both `BEGIN PRIVATE KEY` and `BEGIN EC PRIVATE KEY`.
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        Self::from_pkey(PKey::private_key_from_pem(pem)?)
    }

    #[inline]
    pub fn algorithm(&self) -> EcdsaAlgorithm {
        self.algorithm
    }

    pub fn private_key_to_pem_pkcs8(&self) -> Result<Vec<u8>> {
        Ok(self.private_key.private_key_to_pem_pkcs8()?)
    }

    pub fn public_key(&self) -> Result<EcdsaPublicKey> {
        let (x, y) = self.coordinates()?;
        EcdsaPublicKey::from_coordinates(&x, &y, self.algorithm)
    }

    /// Public point, each coordinate left padded to the field size.
    pub fn coordinates(&self) -> Result<(Vec<u8>, Vec<u8>)> {
        affine_coordinates(&self.private_key.ec_key()?, self.algorithm)
    }
}

fn affine_coordinates<T: HasPublic>(
    ec: &EcKey<T>,
    algorithm: EcdsaAlgorithm,
) -> Result<(Vec<u8>, Vec<u8>)> {
    let mut ctx = BigNumContext::new()?;
    let mut x = BigNum::new()?;
    let mut y = BigNum::new()?;
    ec.public_key()
        .affine_coordinates(ec.group(), &mut x, &mut y, &mut ctx)?;

    let len = algorithm.field_len() as i32;
    Ok((x.to_vec_padded(len)?, y.to_vec_padded(len)?))
}

impl SigningKey for EcdsaPrivateKey {
    #[inline]
    fn alg(&self) -> &'static str {
        self.algorithm.name()
    }

    fn sign(&self, v: &[u8]) -> Result<SmallVec<[u8; 64]>> {
        let mut signer = Signer::new(self.algorithm.digest(), &self.private_key)?;
        signer.update(v)?;
        let der = EcdsaSig::from_der(&signer.sign_to_vec()?)?;

        // DER to the fixed width r || s form of RFC 7518 §3.4.
        let len = self.algorithm.field_len() as i32;
        let mut out = SmallVec::with_capacity(self.algorithm.signature_len());
        out.extend_from_slice(&der.r().to_vec_padded(len)?);
        out.extend_from_slice(&der.s().to_vec_padded(len)?);
        Ok(out)
    }
}

impl PublicKeyToJwk for EcdsaPrivateKey {
    fn public_key_to_jwk(&self) -> Result<Jwk> {
        self.public_key()?.public_key_to_jwk()
    }
}

#[derive(Debug)]
pub struct EcdsaPublicKey {
    public_key: PKey<Public>,
    algorithm: EcdsaAlgorithm,
}

impl EcdsaPublicKey {
    pub fn from_coordinates(x: &[u8], y: &[u8], algorithm: EcdsaAlgorithm) -> Result<Self> {
        let group = algorithm.group()?;
        let (x, y) = (BigNum::from_slice(x)?, BigNum::from_slice(y)?);
        let ec = EcKey::from_public_key_affine_coordinates(&group, &x, &y)?;
        ec.check_key()?;
        Ok(Self {
            public_key: PKey::from_ec_key(ec)?,
            algorithm,
        })
    }

    pub fn coordinates(&self) -> Result<(Vec<u8>, Vec<u8>)> {
        affine_coordinates(&self.public_key.ec_key()?, self.algorithm)
    }
}

impl PublicKeyToJwk for EcdsaPublicKey {
    fn public_key_to_jwk(&self) -> Result<Jwk> {
        let (x, y) = self.coordinates()?;
        let params = self.algorithm.params();
        Ok(Jwk {
            kty: "EC".into(),
            use_: Some("sig".into()),
            alg: Some(params.alg.into()),
            crv: Some(params.crv.into()),
            x: Some(base64::encode_config(x, url_safe_trailing_bits())),
            y: Some(base64::encode_config(y, url_safe_trailing_bits())),
            ..Default::default()
        })
    }
}

impl VerificationKey for EcdsaPublicKey {
    fn verify(&self, v: &[u8], sig: &[u8], alg: &str) -> Result<()> {
        // One curve, one algorithm.
        if alg != self.algorithm.name() || sig.len() != self.algorithm.signature_len() {
            return Err(Error::VerificationError);
        }
        let (r, s) = sig.split_at(self.algorithm.field_len());
        let der = EcdsaSig::from_private_components(BigNum::from_slice(r)?, BigNum::from_slice(s)?)?
            .to_der()?;

        let mut verifier = Verifier::new(self.algorithm.digest(), &self.public_key)?;
        match verifier.verify_oneshot(&der, v)? {
            true => Ok(()),
            false => Err(Error::VerificationError),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn algorithm_names() {
        for alg in EcdsaAlgorithm::ALL {
            assert_eq!(EcdsaAlgorithm::from_name(alg.name()).unwrap(), alg);
            let crv = alg.params().crv;
            assert_eq!(EcdsaAlgorithm::from_curve_name(crv).unwrap(), alg);
        }
        assert!(matches!(
            EcdsaAlgorithm::from_name("ES256K"),
            Err(Error::UnsupportedAlgorithm(_))
        ));
        assert!(EcdsaAlgorithm::from_curve_name("secp256k1").is_err());
    }

    #[test]
    fn pem_loading() -> Result<()> {
        let k = EcdsaPrivateKey::generate(EcdsaAlgorithm::ES384)?;
        let k1 = EcdsaPrivateKey::from_pem(&k.private_key_to_pem_pkcs8()?)?;
        assert_eq!(k1.algorithm(), EcdsaAlgorithm::ES384);
        assert_eq!(k.coordinates()?, k1.coordinates()?);

        // SEC1 PEM, as written by `openssl ecparam -genkey`.
        let sec1 = k.private_key.ec_key()?.private_key_to_pem()?;
        assert!(String::from_utf8_lossy(&sec1).contains("BEGIN EC PRIVATE KEY"));
        EcdsaPrivateKey::from_pem(&sec1)?;

        let k256_group = EcGroup::from_curve_name(Nid::SECP256K1)?;
        let k256 = EcKey::generate(&k256_group)?;
        assert!(EcdsaPrivateKey::from_pem(&k256.private_key_to_pem()?).is_err());

        let rsa = PKey::from_rsa(openssl::rsa::Rsa::generate(2048)?)?;
        assert!(EcdsaPrivateKey::from_pem(&rsa.private_key_to_pem_pkcs8()?).is_err());
        Ok(())
    }

    #[test]
    fn sign_verify() -> Result<()> {
        for alg in EcdsaAlgorithm::ALL {
            let k = EcdsaPrivateKey::generate(alg)?;
            let pk = k.public_key()?;
            let sig = k.sign(b"payload")?;
            assert_eq!(sig.len(), alg.signature_len());
            pk.verify(b"payload", &sig, alg.name())?;
            assert!(pk.verify(b"payload!", &sig, alg.name()).is_err());
            assert!(pk.verify(b"payload", &sig, "RS256").is_err());
            assert!(pk.verify(b"payload", &sig[1..], alg.name()).is_err());
        }
        Ok(())
    }

    #[test]
    fn jwk_has_padded_coordinates() -> Result<()> {
        let k = EcdsaPrivateKey::generate(EcdsaAlgorithm::ES512)?;
        let jwk = k.public_key_to_jwk()?;
        assert_eq!(jwk.kty, "EC");
        assert_eq!(jwk.crv.as_deref(), Some("P-521"));
        assert_eq!(jwk.alg.as_deref(), Some("ES512"));
        for c in [jwk.x, jwk.y] {
            let c = base64::decode_config(c.unwrap(), url_safe_trailing_bits())?;
            assert_eq!(c.len(), 66);
        }
        Ok(())
    }
}
