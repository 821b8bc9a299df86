//! Opaque, tamper-evident dashboard link tokens.
//!
//! Token layout (before URL-safe base64 without padding):
//!
//! ```text
//! nonce (12 bytes) || ChaCha20-Poly1305 ciphertext of {"key","id","iat"} || tag (16 bytes)
//! ```
//!
//! The AEAD key is SHA-256 of the configured secret. A fresh random nonce
//! per token means the same `(key, id)` encodes differently each time.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{DecodeError, LinkError};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
/// Associated data; bumping it invalidates every outstanding token.
const AAD: &[u8] = b"vidyarth:link:v1";

/// A decoded navigation target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkTarget {
    pub key: String,
    pub id: i64,
}

#[derive(Serialize, Deserialize)]
struct Claims {
    key: String,
    id: i64,
    iat: i64,
}

/// Encodes `(key, id)` pairs into URL tokens and back.
#[derive(Clone)]
pub struct SecureLinkCodec {
    cipher: ChaCha20Poly1305,
    max_age: Option<Duration>,
}

impl fmt::Debug for SecureLinkCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureLinkCodec")
            .field("max_age", &self.max_age)
            .finish_non_exhaustive()
    }
}

impl SecureLinkCodec {
    /// Create a codec from a shared secret. Tokens never expire unless
    /// [`with_max_age`](Self::with_max_age) is set.
    pub fn new(secret: &str) -> Result<Self, LinkError> {
        if secret.is_empty() {
            return Err(LinkError::EmptySecret);
        }
        let digest = Sha256::digest(secret.as_bytes());
        Ok(Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(digest.as_slice())),
            max_age: None,
        })
    }

    /// Reject tokens older than `secs` seconds. Zero or negative disables expiry.
    pub fn with_max_age(mut self, secs: i64) -> Self {
        self.max_age = (secs > 0).then(|| Duration::seconds(secs));
        self
    }

    pub fn encode(&self, key: &str, id: i64) -> Result<String, LinkError> {
        self.encode_at(key, id, Utc::now())
    }

    /// Encode with an explicit issue time.
    pub fn encode_at(&self, key: &str, id: i64, issued_at: DateTime<Utc>) -> Result<String, LinkError> {
        if key.trim().is_empty() {
            return Err(LinkError::EmptyKey);
        }
        let claims = Claims {
            key: key.to_string(),
            id,
            iat: issued_at.timestamp(),
        };
        let plain = serde_json::to_vec(&claims).map_err(|e| LinkError::Payload(e.to_string()))?;

        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), Payload { msg: &plain, aad: AAD })
            .map_err(|_| LinkError::Encrypt)?;

        let mut raw = Vec::with_capacity(NONCE_LEN + sealed.len());
        raw.extend_from_slice(&nonce);
        raw.extend_from_slice(&sealed);
        Ok(URL_SAFE_NO_PAD.encode(raw))
    }

    /// Decode a token. Never panics on untrusted input.
    pub fn decode(&self, token: &str) -> Result<LinkTarget, DecodeError> {
        self.decode_at(token, Utc::now())
    }

    /// Decode, checking expiry against `now`.
    pub fn decode_at(&self, token: &str, now: DateTime<Utc>) -> Result<LinkTarget, DecodeError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(DecodeError::Empty);
        }

        let raw = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| DecodeError::Malformed)?;
        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(DecodeError::Malformed);
        }
        let (nonce, sealed) = raw.split_at(NONCE_LEN);

        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), Payload { msg: sealed, aad: AAD })
            .map_err(|_| DecodeError::Tampered)?;

        // Authentic bytes that are not our payload still fail closed.
        let claims: Claims = serde_json::from_slice(&plain).map_err(|_| DecodeError::Malformed)?;
        if claims.key.trim().is_empty() {
            return Err(DecodeError::Empty);
        }

        if let Some(max_age) = self.max_age {
            let issued = DateTime::<Utc>::from_timestamp(claims.iat, 0).ok_or(DecodeError::Malformed)?;
            if now - issued > max_age {
                return Err(DecodeError::Expired);
            }
        }

        Ok(LinkTarget {
            key: claims.key,
            id: claims.id,
        })
    }
}

/// Map a link key onto a dashboard section name: trimmed, lower-case,
/// spaces replaced with underscores.
pub fn normalize_section_key(key: &str) -> String {
    key.trim().to_lowercase().replace(' ', "_")
}

/// Build the dashboard URL that carries a token in its `auth` parameter.
pub fn dashboard_url(base_url: &str, token: &str) -> String {
    format!("{}/dashboard?auth={}", base_url.trim_end_matches('/'), token)
}
