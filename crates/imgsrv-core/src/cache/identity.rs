//! Identifiers for sources, derivatives and requesters.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::DeriveError;
use crate::params::DeriveParams;

/// Longest accepted source id.
const MAX_SOURCE_ID_LEN: usize = 128;

/// Hex characters of the parameter digest kept in a derivative id.
const DIGEST_LEN: usize = 32;

/// Identifier of an ingested source image. Safe to use as a file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SourceId(String);

impl SourceId {
    /// Validate a client-supplied id.
    pub fn parse(id: &str) -> Result<Self, DeriveError> {
        let valid = !id.is_empty()
            && id.len() <= MAX_SOURCE_ID_LEN
            && id
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if valid {
            Ok(Self(id.to_string()))
        } else {
            Err(DeriveError::InvalidParameters(format!(
                "'{id}' is not a valid source id"
            )))
        }
    }

    /// A fresh random id: 16 random bytes, hex encoded.
    pub fn generate() -> Self {
        let bytes: [u8; 16] = rand::thread_rng().gen();
        Self(bytes.iter().map(|b| format!("{b:02x}")).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl TryFrom<String> for SourceId {
    type Error = DeriveError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SourceId> for String {
    fn from(id: SourceId) -> Self {
        id.0
    }
}

/// Identity of one derivative: the source plus a digest of the canonical
/// parameters. Two requests with equal parameters share an identity.
///
/// The string form `{source}-{digest}` is also the artifact's file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DerivativeId {
    source: SourceId,
    digest: String,
}

impl DerivativeId {
    pub fn new(source: &SourceId, params: &DeriveParams) -> Self {
        // serializing a plain struct of options and a Vec cannot fail
        let canonical = serde_json::to_vec(params).unwrap_or_default();
        let hash = blake3::hash(&canonical);
        let mut digest = hash.to_hex().to_string();
        digest.truncate(DIGEST_LEN);
        Self {
            source: source.clone(),
            digest,
        }
    }

    pub fn source(&self) -> &SourceId {
        &self.source
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }
}

impl fmt::Display for DerivativeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.source, self.digest)
    }
}

impl FromStr for DerivativeId {
    type Err = DeriveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DeriveError::InvalidParameters(format!("'{s}' is not a derivative id"));
        let (source, digest) = s.rsplit_once('-').ok_or_else(invalid)?;
        let digest_ok = digest.len() == DIGEST_LEN
            && digest.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !digest_ok {
            return Err(invalid());
        }
        Ok(Self {
            source: SourceId::parse(source)?,
            digest: digest.to_string(),
        })
    }
}

impl TryFrom<String> for DerivativeId {
    type Error = DeriveError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DerivativeId> for String {
    fn from(id: DerivativeId) -> Self {
        id.to_string()
    }
}

/// Opaque id of one in-flight request, unique per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequesterId(Uuid);

impl RequesterId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequesterId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequesterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Polygon;

    fn source() -> SourceId {
        SourceId::parse("3f2a9c").unwrap()
    }

    #[test]
    fn test_source_id_rejects_path_tricks() {
        assert!(SourceId::parse("../etc/passwd").is_err());
        assert!(SourceId::parse("a/b").is_err());
        assert!(SourceId::parse("").is_err());
        assert!(SourceId::parse(&"a".repeat(129)).is_err());
        assert!(SourceId::parse("photo_2024-01").is_ok());
    }

    #[test]
    fn test_generated_source_ids_are_distinct_hex() {
        let a = SourceId::generate();
        let b = SourceId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(SourceId::parse(a.as_str()).is_ok());
    }

    #[test]
    fn test_equal_params_share_identity() {
        let a = DeriveParams::from_query([("width", "400"), ("rotation", "360")]).unwrap();
        let b = DeriveParams::from_query([("width", "400")]).unwrap();
        assert_eq!(DerivativeId::new(&source(), &a), DerivativeId::new(&source(), &b));
    }

    #[test]
    fn test_different_params_differ() {
        let a = DeriveParams {
            polygon: Some(Polygon::parse("[[0,0],[10,0],[10,10]]").unwrap()),
            ..DeriveParams::default()
        };
        let b = DeriveParams {
            grayscale: true,
            ..DeriveParams::default()
        };
        assert_ne!(DerivativeId::new(&source(), &a), DerivativeId::new(&source(), &b));
    }

    #[test]
    fn test_derivative_id_string_round_trip() {
        let hyphenated = SourceId::parse("my-photo").unwrap();
        let id = DerivativeId::new(&hyphenated, &DeriveParams::default());
        let parsed: DerivativeId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert_eq!(parsed.source().as_str(), "my-photo");

        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        assert!("nodigest".parse::<DerivativeId>().is_err());
        assert!("abc-XYZ".parse::<DerivativeId>().is_err());
    }
}
