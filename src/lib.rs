#![doc = include_str!("../README.md")]

use openssl::error::ErrorStack;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_with::{formats::Flexible, serde_as, skip_serializing_none, DurationSeconds};
use smallvec::SmallVec;
use std::{
    borrow::Cow,
    fmt,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use jwk::Jwk;
pub use some::*;

mod some;

pub mod ecdsa;

pub mod rsa;

pub mod jwk;

pub mod config;

pub mod key_store;

pub mod assertion;

pub mod relay;

pub mod publisher;

pub mod server;

/// JOSE header of a compact JWS.
#[non_exhaustive]
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct Header {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,

    pub alg: Cow<'static, str>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,

    /// Header parameters not modelled above, e.g. `x5t` from an IdP.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A claim that may be a single value or an array, like `aud`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Vec(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn is_empty(&self) -> bool {
        matches!(self, OneOrMany::Vec(v) if v.is_empty())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        match self {
            OneOrMany::One(v) => std::slice::from_ref(v).iter(),
            OneOrMany::Vec(v) => v.iter(),
        }
    }
}

impl<T: PartialEq> OneOrMany<T> {
    pub fn contains(&self, v: &T) -> bool {
        self.iter().any(|x| x == v)
    }
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        Self::Vec(Vec::new())
    }
}

/// Registered JWT claims plus `ExtraClaims`.
///
/// Timestamps are durations since the unix epoch. They are written as integer
/// seconds (NumericDate) and read from integers, floats or strings.
#[serde_as]
#[skip_serializing_none]
#[non_exhaustive]
#[derive(Debug, Serialize, Default, Deserialize)]
pub struct Claims<ExtraClaims> {
    pub iss: Option<String>,
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "OneOrMany::is_empty")]
    pub aud: OneOrMany<String>,
    pub jti: Option<String>,

    #[serde_as(as = "Option<DurationSeconds<u64, Flexible>>")]
    pub iat: Option<Duration>,
    #[serde_as(as = "Option<DurationSeconds<u64, Flexible>>")]
    pub nbf: Option<Duration>,
    #[serde_as(as = "Option<DurationSeconds<u64, Flexible>>")]
    pub exp: Option<Duration>,

    #[serde(flatten)]
    pub extra: ExtraClaims,
}

/// A JWT before signing or after verification.
///
/// Use `()` as `ExtraClaims` when only the registered claims matter.
#[derive(Default, Debug)]
pub struct HeaderAndClaims<ExtraClaims> {
    header: Header,
    claims: Claims<ExtraClaims>,
}

macro_rules! claim_setter {
    ($name:ident, $claim:ident) => {
        pub fn $name(&mut self, $claim: impl Into<String>) -> &mut Self {
            self.claims.$claim = Some($claim.into());
            self
        }
    };
}

impl<ExtraClaims> HeaderAndClaims<ExtraClaims> {
    pub fn with_claims(extra: ExtraClaims) -> Self {
        Self {
            header: Header::default(),
            claims: Claims {
                iss: None,
                sub: None,
                aud: OneOrMany::default(),
                jti: None,
                iat: None,
                nbf: None,
                exp: None,
                extra,
            },
        }
    }

    #[inline]
    pub fn header(&self) -> &Header {
        &self.header
    }

    #[inline]
    pub fn claims(&self) -> &Claims<ExtraClaims> {
        &self.claims
    }

    pub fn set_kid(&mut self, kid: impl Into<String>) -> &mut Self {
        self.header.kid = Some(kid.into());
        self
    }

    pub fn set_typ(&mut self, typ: impl Into<String>) -> &mut Self {
        self.header.typ = Some(typ.into());
        self
    }

    claim_setter!(set_iss, iss);
    claim_setter!(set_sub, sub);
    claim_setter!(set_jti, jti);

    pub fn set_auds(&mut self, auds: Vec<String>) -> &mut Self {
        self.claims.aud = OneOrMany::Vec(auds);
        self
    }

    /// `iat`, as a duration since the unix epoch.
    pub fn set_iat(&mut self, iat: Duration) -> &mut Self {
        self.claims.iat = Some(iat);
        self
    }

    /// `exp`, as a duration since the unix epoch.
    pub fn set_exp(&mut self, exp: Duration) -> &mut Self {
        self.claims.exp = Some(exp);
        self
    }
}

/// Clocks set before 1970 are treated as the epoch itself.
#[inline]
pub(crate) fn since_epoch(t: SystemTime) -> Duration {
    t.duration_since(UNIX_EPOCH).unwrap_or_default()
}

// Some issuers leave non-zero trailing bits in their segments.
#[inline(always)]
fn url_safe_trailing_bits() -> base64::Config {
    base64::URL_SAFE_NO_PAD.decode_allow_trailing_bits(true)
}

fn encode_segment<T: Serialize>(value: &T, out: &mut String) -> Result<()> {
    let json = serde_json::to_vec(value)?;
    base64::encode_config_buf(json, base64::URL_SAFE_NO_PAD, out);
    Ok(())
}

fn decode_segment<T: DeserializeOwned>(segment: &str) -> Result<T> {
    let json = base64::decode_config(segment, url_safe_trailing_bits())?;
    Ok(serde_json::from_slice(&json)?)
}

/// The three dot separated segments of a compact JWS.
struct Compact<'a> {
    header: &'a str,
    payload: &'a str,
    signature: &'a str,
    /// `header.payload`, the bytes the signature covers.
    signing_input: &'a str,
}

impl<'a> Compact<'a> {
    fn split(token: &'a str) -> Result<Self> {
        let mut parts = token.split('.');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(header), Some(payload), Some(signature), None) => Ok(Self {
                header,
                payload,
                signature,
                signing_input: &token[..header.len() + 1 + payload.len()],
            }),
            _ => Err(Error::InvalidToken),
        }
    }
}

/// Sign `token` with `k` and return it in compact serialization.
///
/// The header's `alg` is taken from the key, and so is `kid` when the key has
/// one.
pub fn sign<ExtraClaims: Serialize>(
    token: &mut HeaderAndClaims<ExtraClaims>,
    k: &dyn SigningKey,
) -> Result<String> {
    token.header.alg = k.alg().into();
    if let Some(kid) = k.kid() {
        token.set_kid(kid);
    }

    let mut out = String::new();
    encode_segment(&token.header, &mut out)?;
    out.push('.');
    encode_segment(&token.claims, &mut out)?;

    let signature = k.sign(out.as_bytes())?;
    out.push('.');
    base64::encode_config_buf(&signature[..], base64::URL_SAFE_NO_PAD, &mut out);
    Ok(out)
}

/// Verify the signature of `token` with `k`, then its `exp` and `nbf` claims
/// against the current time.
pub fn verify<ExtraClaims: DeserializeOwned>(
    token: &str,
    k: &dyn VerificationKey,
) -> Result<HeaderAndClaims<ExtraClaims>> {
    let verified = verify_only(token, k)?;

    let now = since_epoch(SystemTime::now());
    match verified.claims.exp {
        Some(exp) if now > exp => return Err(Error::Expired),
        _ => {}
    }
    match verified.claims.nbf {
        Some(nbf) if now < nbf => return Err(Error::Before),
        _ => {}
    }
    Ok(verified)
}

/// Verify the signature of `token` with `k`. Time based claims are not
/// looked at.
pub fn verify_only<ExtraClaims: DeserializeOwned>(
    token: &str,
    k: &dyn VerificationKey,
) -> Result<HeaderAndClaims<ExtraClaims>> {
    let compact = Compact::split(token)?;
    let header: Header = decode_segment(compact.header)?;
    let signature = base64::decode_config(compact.signature, url_safe_trailing_bits())?;

    k.verify(compact.signing_input.as_bytes(), &signature, &header.alg)?;

    let claims = decode_segment(compact.payload)?;
    Ok(HeaderAndClaims { header, claims })
}

/// Decode the header of a compact JWS without verifying anything.
pub fn decode_header(token: &str) -> Result<Header> {
    decode_segment(Compact::split(token)?.header)
}

pub trait SigningKey {
    /// JWS `alg` this key signs with. Fixed per key.
    fn alg(&self) -> &'static str;

    /// Written to the `kid` header when present.
    fn kid(&self) -> Option<&str> {
        None
    }

    fn sign(&self, v: &[u8]) -> Result<SmallVec<[u8; 64]>>;
}

pub trait VerificationKey {
    // RSA keys verify under several algorithms, hence `alg`.
    fn verify(&self, v: &[u8], sig: &[u8], alg: &str) -> Result<()>;
}

pub trait PublicKeyToJwk {
    fn public_key_to_jwk(&self) -> Result<Jwk>;
}

#[non_exhaustive]
#[derive(Debug)]
pub enum Error {
    /// Not three dot separated segments.
    InvalidToken,
    VerificationError,
    NoKid,
    NoKey,
    Expired,
    /// `nbf` is in the future.
    Before,
    UnsupportedOrInvalidKey,
    /// The named algorithm is not one this crate can sign with.
    UnsupportedAlgorithm(String),
    /// No signing key is loaded for the algorithm.
    KeyNotFound(String),
    /// Missing or malformed configuration. Fatal at startup.
    Config(String),
    Io(std::io::Error),
    OpenSsl(ErrorStack),
    Json(serde_json::Error),
    Base64(base64::DecodeError),
    Http(reqwest::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidToken => f.write_str("malformed compact JWS"),
            Error::VerificationError => f.write_str("signature verification failed"),
            Error::NoKid => f.write_str("token header has no kid"),
            Error::NoKey => f.write_str("no key in the set has the token's kid"),
            Error::Expired => f.write_str("token has expired"),
            Error::Before => f.write_str("token is not valid yet"),
            Error::UnsupportedOrInvalidKey => f.write_str("unsupported or invalid key"),
            Error::UnsupportedAlgorithm(alg) => write!(f, "unsupported algorithm: {}", alg),
            Error::KeyNotFound(alg) => write!(f, "no signing key loaded for {}", alg),
            Error::Config(msg) => write!(f, "configuration error: {}", msg),
            Error::Io(e) => write!(f, "io: {}", e),
            Error::OpenSsl(e) => write!(f, "openssl: {}", e),
            Error::Json(e) => write!(f, "json: {}", e),
            Error::Base64(e) => write!(f, "base64: {}", e),
            Error::Http(e) => write!(f, "http: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::OpenSsl(e) => Some(e),
            Error::Json(e) => Some(e),
            Error::Base64(e) => Some(e),
            Error::Http(e) => Some(e),
            _ => None,
        }
    }
}

macro_rules! error_from {
    ($($source:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$source> for Error {
                #[inline]
                fn from(e: $source) -> Self {
                    Error::$variant(e)
                }
            }
        )*
    };
}

error_from! {
    std::io::Error => Io,
    ErrorStack => OpenSsl,
    serde_json::Error => Json,
    base64::DecodeError => Base64,
    reqwest::Error => Http,
}

pub type Result<T> = std::result::Result<T, Error>;
