//! `private_key_jwt` client assertions (RFC 7523).
use std::time::{Duration, SystemTime};

use openssl::rand::rand_bytes;
use tracing::debug;

use crate::{since_epoch, sign, HeaderAndClaims, Result, SigningKey};

/// `client_assertion_type` that goes along with every assertion.
pub const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Lifetime of an assertion. Fixed, it bounds the replay window.
pub const ASSERTION_TTL: Duration = Duration::from_secs(120);

/// A signed client assertion.
#[derive(Clone)]
pub struct SignedAssertion {
    /// Compact JWS.
    pub token: String,
    pub jti: String,
    /// Seconds since the unix epoch.
    pub issued_at: Duration,
    pub expires_at: Duration,
}

// The token authenticates the client for its lifetime, so only the metadata
// is printable.
impl std::fmt::Debug for SignedAssertion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedAssertion")
            .field("jti", &self.jti)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Issue a client assertion for `issuer_id`.
///
/// `iss` and `sub` are both `issuer_id`, `aud` is `audience` as given (the IdP
/// and its token endpoint), `exp` is [`ASSERTION_TTL`] after `iat`, and `jti`
/// is 128 fresh random bits. The header carries the key's algorithm and `kid`.
pub fn issue(issuer_id: &str, audience: &[String], key: &dyn SigningKey) -> Result<SignedAssertion> {
    issue_at(issuer_id, audience, key, SystemTime::now())
}

pub(crate) fn issue_at(
    issuer_id: &str,
    audience: &[String],
    key: &dyn SigningKey,
    now: SystemTime,
) -> Result<SignedAssertion> {
    let jti = new_jti()?;
    // NumericDate has whole seconds.
    let issued_at = Duration::from_secs(since_epoch(now).as_secs());
    let expires_at = issued_at + ASSERTION_TTL;

    let mut claims = HeaderAndClaims::with_claims(());
    claims
        .set_typ("JWT")
        .set_iss(issuer_id)
        .set_sub(issuer_id)
        .set_auds(audience.to_vec())
        .set_jti(jti.clone())
        .set_iat(issued_at)
        .set_exp(expires_at);
    let token = sign(&mut claims, key)?;

    debug!(%jti, alg = key.alg(), kid = key.kid(), "issued client assertion");
    Ok(SignedAssertion {
        token,
        jti,
        issued_at,
        expires_at,
    })
}

fn new_jti() -> Result<String> {
    let mut buf = [0u8; 16];
    rand_bytes(&mut buf)?;
    Ok(base64::encode_config(buf, base64::URL_SAFE_NO_PAD))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use crate::{
        ecdsa::{EcdsaAlgorithm, EcdsaPrivateKey},
        jwk::{JwkSet, WithKid},
        rsa::{RsaAlgorithm, RsaPrivateKey},
        Error, PublicKeyToJwk,
    };

    use super::*;

    fn audience() -> Vec<String> {
        vec![
            "https://idp.example.com".into(),
            "https://idp.example.com/oauth2/token".into(),
        ]
    }

    #[test]
    fn claims() -> Result<()> {
        let k = WithKid::new(
            "rsa-1".into(),
            RsaPrivateKey::generate(2048, RsaAlgorithm::RS256)?,
        );
        let jwks = JwkSet {
            keys: vec![k.public_key_to_jwk()?],
        };

        let assertion = issue("rp1", &audience(), &k)?;
        let verified = jwks.verifier().verify::<()>(&assertion.token)?;

        let header = verified.header();
        assert_eq!(header.alg, "RS256");
        assert_eq!(header.kid.as_deref(), Some("rsa-1"));
        assert_eq!(header.typ.as_deref(), Some("JWT"));

        let claims = verified.claims();
        assert_eq!(claims.iss.as_deref(), Some("rp1"));
        assert_eq!(claims.sub, claims.iss);
        for aud in audience() {
            assert!(claims.aud.contains(&aud), "{}", aud);
        }
        assert_eq!(claims.jti.as_deref(), Some(&*assertion.jti));

        let iat = claims.iat.unwrap();
        let exp = claims.exp.unwrap();
        assert_eq!(exp - iat, ASSERTION_TTL);
        assert_eq!(iat, assertion.issued_at);
        assert_eq!(exp, assertion.expires_at);
        let now = since_epoch(SystemTime::now());
        assert!(iat <= now && now < exp);
        Ok(())
    }

    #[test]
    fn jti_is_unique() -> Result<()> {
        let k = EcdsaPrivateKey::generate(EcdsaAlgorithm::ES256)?;
        let mut seen = HashSet::new();
        for _ in 0..500 {
            let assertion = issue("rp1", &audience(), &k)?;
            assert_eq!(assertion.jti.len(), 22);
            assert!(seen.insert(assertion.jti));
        }
        Ok(())
    }

    #[test]
    fn expired_assertion_fails_verification() -> Result<()> {
        let k = WithKid::new(
            "ec-1".into(),
            EcdsaPrivateKey::generate(EcdsaAlgorithm::ES256)?,
        );
        let jwks = JwkSet {
            keys: vec![k.public_key_to_jwk()?],
        };

        let then = SystemTime::now() - ASSERTION_TTL - Duration::from_secs(1);
        let assertion = issue_at("rp1", &audience(), &k, then)?;
        assert!(matches!(
            jwks.verifier().verify::<()>(&assertion.token),
            Err(Error::Expired)
        ));
        Ok(())
    }

    #[test]
    fn signed_by_the_given_key_only() -> Result<()> {
        let k1 = WithKid::new(
            "k".into(),
            EcdsaPrivateKey::generate(EcdsaAlgorithm::ES256)?,
        );
        let k2 = WithKid::new(
            "k".into(),
            EcdsaPrivateKey::generate(EcdsaAlgorithm::ES256)?,
        );
        let jwks = JwkSet {
            keys: vec![k2.public_key_to_jwk()?],
        };
        let assertion = issue("rp1", &audience(), &k1)?;
        assert!(matches!(
            jwks.verifier().verify::<()>(&assertion.token),
            Err(Error::VerificationError)
        ));
        Ok(())
    }

    #[test]
    fn debug_hides_token() -> Result<()> {
        let k = EcdsaPrivateKey::generate(EcdsaAlgorithm::ES256)?;
        let assertion = issue("rp1", &audience(), &k)?;
        let debug = format!("{:?}", assertion);
        assert!(debug.contains(&assertion.jti));
        assert!(!debug.contains(&assertion.token));
        Ok(())
    }
}
