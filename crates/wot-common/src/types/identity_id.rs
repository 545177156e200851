//! Identity identifiers and request/insert URIs.
//!
//! An [`IdentityId`] is the content hash of an identity's public routing
//! key: stable, unique, and independent of the signed document's edition.
//! A [`Uri`] is the updatable locator used to fetch (or insert) that
//! document at a particular edition.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WotError};

const DOC_NAME: &str = "WebOfTrust";

/// Content-hash identifier for an [`crate::types::Identity`].
///
/// Immutable and unique: two identities with the same routing key are the
/// same identity by definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityId([u8; 32]);

impl IdentityId {
    /// Derive the id from a 32-byte routing key via blake3.
    pub fn from_routing_key(routing_key: &[u8; 32]) -> Self {
        let hash = blake3::hash(routing_key);
        Self(*hash.as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for IdentityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(self.0)
        )
    }
}

impl PartialEq for IdentityId {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl Eq for IdentityId {}

impl std::hash::Hash for IdentityId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl Ord for IdentityId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}
impl PartialOrd for IdentityId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
/// Which of the two accepted request-URI shapes this URI was parsed from.
///
/// Freenet-descended WoT deployments accept `USK@.../WebOfTrust/N` as well
/// as a legacy `SSK@.../WebOfTrust-N` form; both carry the same fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UriShape {
    Modern,
    Legacy,
}

/// A signed-document locator: either a request URI (public, shareable) or
/// an insert URI (private, only ever held for local own-identities).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Uri {
    pub routing_key: [u8; 32],
    pub crypto_key: [u8; 32],
    pub extra: Vec<u8>,
    pub doc_name: String,
    pub edition: u64,
    pub shape: UriShape,
    /// True for an insert URI; such a URI must never be stored on a
    /// remote [`crate::types::Identity`].
    pub is_insert: bool,
}

impl Uri {
    /// Parse a request URI. Accepts either of the two interchangeable
    /// shapes; rejects an insert URI.
    pub fn parse_request(raw: &str) -> Result<Self> {
        let uri = Self::parse_any(raw)?;
        if uri.is_insert {
            return Err(WotError::MalformedUri(
                "expected a request URI, got an insert URI".into(),
            ));
        }
        Ok(uri)
    }

    /// Parse an insert URI. Only valid for local own-identity construction.
    pub fn parse_insert(raw: &str) -> Result<Self> {
        let uri = Self::parse_any(raw)?;
        if !uri.is_insert {
            return Err(WotError::MalformedUri(
                "expected an insert URI, got a request URI".into(),
            ));
        }
        Ok(uri)
    }

    fn parse_any(raw: &str) -> Result<Self> {
        let (is_insert, rest) = if let Some(rest) = raw.strip_prefix("USK@") {
            (false, rest)
        } else if let Some(rest) = raw.strip_prefix("SSK@") {
            (false, rest)
        } else if let Some(rest) = raw.strip_prefix("ISK@") {
            (true, rest)
        } else {
            return Err(WotError::MalformedUri(format!(
                "unrecognized URI scheme: {raw}"
            )));
        };

        let segments: Vec<&str> = rest.split('/').collect();
        if segments.is_empty() {
            return Err(WotError::MalformedUri("empty URI body".into()));
        }

        let key_part = segments[0];
        let (routing_key, crypto_key, extra) = Self::decode_key_part(key_part)?;

        let (shape, doc_name, edition) = if segments.len() >= 3 {
            // USK@key/WebOfTrust/7
            let edition = segments[2]
                .parse::<u64>()
                .map_err(|_| WotError::MalformedUri("non-numeric edition".into()))?;
            (UriShape::Modern, segments[1].to_string(), edition)
        } else if segments.len() == 2 {
            // SSK@key/WebOfTrust-7
            let (name, edition_str) = segments[1]
                .rsplit_once('-')
                .ok_or_else(|| WotError::MalformedUri("missing edition separator".into()))?;
            let edition = edition_str
                .parse::<u64>()
                .map_err(|_| WotError::MalformedUri("non-numeric edition".into()))?;
            (UriShape::Legacy, name.to_string(), edition)
        } else {
            return Err(WotError::MalformedUri("missing doc-name/edition".into()));
        };

        if doc_name != DOC_NAME {
            return Err(WotError::MalformedUri(format!(
                "doc-name must be {DOC_NAME}, got {doc_name}"
            )));
        }

        Ok(Self {
            routing_key,
            crypto_key,
            extra,
            doc_name,
            edition,
            shape,
            is_insert,
        })
    }

    fn decode_key_part(part: &str) -> Result<([u8; 32], [u8; 32], Vec<u8>)> {
        let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(part.trim_end_matches(','))
            .map_err(|e| WotError::MalformedUri(format!("bad base64 key material: {e}")))?;
        if decoded.len() < 64 {
            return Err(WotError::MalformedUri(
                "key material shorter than 64 bytes".into(),
            ));
        }
        let mut routing_key = [0u8; 32];
        let mut crypto_key = [0u8; 32];
        routing_key.copy_from_slice(&decoded[0..32]);
        crypto_key.copy_from_slice(&decoded[32..64]);
        let extra = decoded[64..].to_vec();
        Ok((routing_key, crypto_key, extra))
    }

    pub fn identity_id(&self) -> IdentityId {
        IdentityId::from_routing_key(&self.routing_key)
    }

    /// The request-URI counterpart of an insert URI: same key material,
    /// doc-name, and edition, with `is_insert` cleared.
    pub fn to_request_uri(&self) -> Self {
        Self {
            is_insert: false,
            ..self.clone()
        }
    }

    /// Render this URI back to its canonical (modern) string form.
    pub fn to_request_string(&self) -> String {
        let mut key_material = Vec::with_capacity(64 + self.extra.len());
        key_material.extend_from_slice(&self.routing_key);
        key_material.extend_from_slice(&self.crypto_key);
        key_material.extend_from_slice(&self.extra);
        let key = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&key_material);
        format!("USK@{key}/{}/{}", self.doc_name, self.edition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_key_material() -> String {
        let bytes = [7u8; 64];
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
    }

    #[test]
    fn parses_modern_request_uri() {
        let raw = format!("USK@{}/WebOfTrust/3", sample_key_material());
        let uri = Uri::parse_request(&raw).unwrap();
        assert_eq!(uri.edition, 3);
        assert_eq!(uri.shape, UriShape::Modern);
        assert!(!uri.is_insert);
    }

    #[test]
    fn parses_legacy_request_uri() {
        let raw = format!("SSK@{}/WebOfTrust-5", sample_key_material());
        let uri = Uri::parse_request(&raw).unwrap();
        assert_eq!(uri.edition, 5);
        assert_eq!(uri.shape, UriShape::Legacy);
    }

    #[test]
    fn rejects_insert_uri_as_request() {
        let raw = format!("ISK@{}/WebOfTrust/0", sample_key_material());
        assert!(Uri::parse_request(&raw).is_err());
    }

    #[test]
    fn rejects_wrong_doc_name() {
        let raw = format!("USK@{}/SomethingElse/0", sample_key_material());
        assert!(Uri::parse_request(&raw).is_err());
    }

    #[test]
    fn identity_id_stable_across_editions() {
        let raw_e0 = format!("USK@{}/WebOfTrust/0", sample_key_material());
        let raw_e1 = format!("USK@{}/WebOfTrust/1", sample_key_material());
        let a = Uri::parse_request(&raw_e0).unwrap().identity_id();
        let b = Uri::parse_request(&raw_e1).unwrap().identity_id();
        assert_eq!(a, b);
    }
}
