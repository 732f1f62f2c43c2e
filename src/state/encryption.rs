//! At-rest encryption for persisted resource state.
//!
//! State is optionally wrapped in an envelope of `{ header, ciphertext, auth-tag }`
//! before it hits the backend's storage column. Decryption happens on read,
//! before the JSON inside is deserialized; encryption happens on write, after
//! the JSON is serialized. A [`KeyProvider`] resolves keys by key-id so a key
//! can be rotated by writing under a new id while old envelopes — still
//! tagged with the previous id — remain readable.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};

const NONCE_LEN: usize = 12;
const ENVELOPE_PREFIX: &str = "oxidenc1:";

/// Resolves a 256-bit AES-GCM key by key-id.
///
/// `current_key_id`/`current_key` are used for encryption on write.
/// `key_for` is consulted for decryption and must also answer for
/// superseded key-ids so old envelopes keep decrypting after rotation.
pub trait KeyProvider: Send + Sync {
    fn current_key_id(&self) -> &str;
    fn current_key(&self) -> &[u8; 32];
    fn key_for(&self, key_id: &str) -> Option<[u8; 32]>;
}

/// A `KeyProvider` backed by keys supplied directly (e.g. read once from an
/// environment variable at startup). Holds at most one retired key, which
/// covers the common single-rotation case; older retired keys fall out of
/// `key_for` and their envelopes become unreadable, matching how a lost key
/// would behave in any key-id-addressed scheme.
pub struct StaticKeyProvider {
    current_id: String,
    current_key: [u8; 32],
    previous: Option<(String, [u8; 32])>,
}

impl StaticKeyProvider {
    pub fn new(current_id: impl Into<String>, current_key: [u8; 32]) -> Self {
        Self {
            current_id: current_id.into(),
            current_key,
            previous: None,
        }
    }

    pub fn with_previous(mut self, key_id: impl Into<String>, key: [u8; 32]) -> Self {
        self.previous = Some((key_id.into(), key));
        self
    }

    /// Build from the conventional environment variables:
    /// `OXID_STATE_ENCRYPTION_KEY` / `_KEY_ID` (required to enable encryption)
    /// and `OXID_STATE_ENCRYPTION_PREVIOUS_KEY` / `_PREVIOUS_KEY_ID` (optional,
    /// for reading state written before a rotation). Keys are 64 hex chars
    /// (32 bytes). Returns `Ok(None)` when the current key isn't set at all —
    /// encryption stays off by default.
    pub fn from_env() -> Result<Option<Self>> {
        let key_hex = match std::env::var("OXID_STATE_ENCRYPTION_KEY") {
            Ok(v) => v,
            Err(_) => return Ok(None),
        };
        let key_id = std::env::var("OXID_STATE_ENCRYPTION_KEY_ID")
            .unwrap_or_else(|_| "default".to_string());
        let key = parse_key_hex(&key_hex).context("OXID_STATE_ENCRYPTION_KEY")?;
        let mut provider = Self::new(key_id, key);

        if let Ok(prev_hex) = std::env::var("OXID_STATE_ENCRYPTION_PREVIOUS_KEY") {
            let prev_id = std::env::var("OXID_STATE_ENCRYPTION_PREVIOUS_KEY_ID")
                .context("OXID_STATE_ENCRYPTION_PREVIOUS_KEY_ID must be set alongside OXID_STATE_ENCRYPTION_PREVIOUS_KEY")?;
            let prev_key = parse_key_hex(&prev_hex).context("OXID_STATE_ENCRYPTION_PREVIOUS_KEY")?;
            provider = provider.with_previous(prev_id, prev_key);
        }

        Ok(Some(provider))
    }
}

fn parse_key_hex(s: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(s.trim()).context("expected 64 hex characters (32 bytes)")?;
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|v: Vec<u8>| anyhow::anyhow!("expected 32 bytes, got {}", v.len()))?;
    Ok(arr)
}

impl KeyProvider for StaticKeyProvider {
    fn current_key_id(&self) -> &str {
        &self.current_id
    }

    fn current_key(&self) -> &[u8; 32] {
        &self.current_key
    }

    fn key_for(&self, key_id: &str) -> Option<[u8; 32]> {
        if key_id == self.current_id {
            return Some(self.current_key);
        }
        self.previous
            .as_ref()
            .filter(|(id, _)| id == key_id)
            .map(|(_, key)| *key)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct EnvelopeWire {
    key_id: String,
    nonce: String,       // base64
    ciphertext: String,  // base64
    auth_tag: String,    // base64
}

/// Encrypt `plaintext` under the provider's current key and return the
/// serialized envelope, prefixed so `decrypt` can tell an envelope apart
/// from plaintext written before encryption was turned on.
pub fn encrypt(provider: &dyn KeyProvider, plaintext: &[u8]) -> Result<String> {
    let cipher = Aes256Gcm::new_from_slice(provider.current_key())
        .context("invalid AES-256-GCM key length")?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let combined = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| anyhow::anyhow!("state encryption failed: {}", e))?;

    // AES-GCM appends a 16-byte authentication tag to the ciphertext; split
    // it out so the envelope stores ciphertext and tag as distinct fields.
    let tag_start = combined.len() - 16;
    let (ciphertext, tag) = combined.split_at(tag_start);

    let wire = EnvelopeWire {
        key_id: provider.current_key_id().to_string(),
        nonce: BASE64.encode(nonce_bytes),
        ciphertext: BASE64.encode(ciphertext),
        auth_tag: BASE64.encode(tag),
    };

    Ok(format!("{}{}", ENVELOPE_PREFIX, serde_json::to_string(&wire)?))
}

/// Decrypt a value previously produced by [`encrypt`]. If `data` doesn't
/// carry the envelope prefix it's returned as-is — this lets a backend read
/// rows written before encryption was enabled without a migration step.
pub fn decrypt(provider: &dyn KeyProvider, data: &str) -> Result<String> {
    let Some(body) = data.strip_prefix(ENVELOPE_PREFIX) else {
        return Ok(data.to_string());
    };

    let wire: EnvelopeWire = serde_json::from_str(body).context("malformed state envelope")?;
    let key = provider.key_for(&wire.key_id).with_context(|| {
        format!(
            "StateError: no key registered for key-id '{}'; state cannot be decrypted",
            wire.key_id
        )
    })?;

    let cipher = Aes256Gcm::new_from_slice(&key).context("invalid AES-256-GCM key length")?;
    let nonce_bytes = BASE64.decode(&wire.nonce).context("malformed envelope nonce")?;
    let nonce = Nonce::from_slice(&nonce_bytes);

    let mut combined = BASE64.decode(&wire.ciphertext).context("malformed envelope ciphertext")?;
    combined.extend(BASE64.decode(&wire.auth_tag).context("malformed envelope auth tag")?);

    let plaintext = cipher
        .decrypt(nonce, combined.as_ref())
        .map_err(|_| anyhow::anyhow!("StateError: state envelope failed authentication (wrong key or corrupted data)"))?;

    String::from_utf8(plaintext).context("decrypted state was not valid UTF-8")
}

/// True if `data` is wrapped in an encryption envelope.
pub fn is_envelope(data: &str) -> bool {
    data.starts_with(ENVELOPE_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> StaticKeyProvider {
        StaticKeyProvider::new("k1", [7u8; 32])
    }

    #[test]
    fn round_trips_through_encrypt_decrypt() {
        let p = provider();
        let envelope = encrypt(&p, b"{\"id\":\"i-1234\"}").unwrap();
        assert!(is_envelope(&envelope));
        let plain = decrypt(&p, &envelope).unwrap();
        assert_eq!(plain, "{\"id\":\"i-1234\"}");
    }

    #[test]
    fn plaintext_passes_through_unchanged_when_not_an_envelope() {
        let p = provider();
        let plain = decrypt(&p, "{\"id\":\"i-1234\"}").unwrap();
        assert_eq!(plain, "{\"id\":\"i-1234\"}");
    }

    #[test]
    fn rotation_reads_old_key_id_while_writing_under_the_new_one() {
        let old = StaticKeyProvider::new("k1", [1u8; 32]);
        let envelope = encrypt(&old, b"secret").unwrap();

        let rotated = StaticKeyProvider::new("k2", [2u8; 32]).with_previous("k1", [1u8; 32]);
        assert_eq!(decrypt(&rotated, &envelope).unwrap(), "secret");

        let new_envelope = encrypt(&rotated, b"secret-v2").unwrap();
        assert!(new_envelope.contains("\"key_id\":\"k2\""));
        assert_eq!(decrypt(&rotated, &new_envelope).unwrap(), "secret-v2");
    }

    #[test]
    fn unknown_key_id_fails_closed() {
        let writer = StaticKeyProvider::new("k1", [3u8; 32]);
        let envelope = encrypt(&writer, b"secret").unwrap();

        let reader = StaticKeyProvider::new("k2", [2u8; 32]);
        assert!(decrypt(&reader, &envelope).is_err());
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let p = provider();
        let mut envelope = encrypt(&p, b"secret").unwrap();
        envelope.push('x');
        assert!(decrypt(&p, &envelope).is_err());
    }
}
