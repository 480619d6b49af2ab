//! Symmetric encryption for vault secrets.
//!
//! ChaCha20-Poly1305 with a 256-bit key derived as SHA-256 of the configured
//! key material. Stored values are self-describing envelopes:
//!
//! ```text
//! enc:v1:{key_id}:{nonce_b64}:{ciphertext_b64}
//! ```
//!
//! `key_id` is a short fingerprint of the derived key, so a ciphertext can be
//! routed to the right key after rotation.

use crate::constants::KEY_FINGERPRINT_HEX_LEN;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chacha20poly1305::aead::Aead;
use chacha20poly1305::{ChaCha20Poly1305, KeyInit, Nonce};
use prefab_core::{GatewayError, PrefabResult};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

const ENVELOPE_PREFIX: &str = "enc:v1:";
const NONCE_SIZE: usize = 12;

/// Cipher context for one key.
#[derive(Clone)]
pub struct SecretCipher {
    key_id: String,
    key: [u8; 32],
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCipher")
            .field("key_id", &self.key_id)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl SecretCipher {
    pub fn from_material(material: &SecretString) -> Self {
        let key: [u8; 32] = Sha256::digest(material.expose_secret().as_bytes()).into();
        let fingerprint = hex::encode(Sha256::digest(key));
        Self {
            key_id: fingerprint[..KEY_FINGERPRINT_HEX_LEN].to_string(),
            key,
        }
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    fn aead(&self) -> PrefabResult<ChaCha20Poly1305> {
        ChaCha20Poly1305::new_from_slice(&self.key)
            .map_err(|e| GatewayError::Internal(format!("failed to initialize cipher: {}", e)))
    }

    /// Encrypt `plaintext` under a fresh random nonce.
    pub fn encrypt(&self, plaintext: &str) -> PrefabResult<String> {
        let nonce_bytes: [u8; NONCE_SIZE] = rand::random();
        let ciphertext = self
            .aead()?
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|e| GatewayError::Internal(format!("failed to encrypt secret: {}", e)))?;

        Ok(format!(
            "{ENVELOPE_PREFIX}{}:{}:{}",
            self.key_id,
            URL_SAFE_NO_PAD.encode(nonce_bytes),
            URL_SAFE_NO_PAD.encode(ciphertext)
        ))
    }

    /// Decrypt an envelope produced under this key.
    ///
    /// Every failure is an integrity error: a stored value that cannot be
    /// opened is never treated as absent.
    pub fn decrypt(&self, stored: &str) -> PrefabResult<SecretString> {
        let envelope = Envelope::parse(stored)?;
        if envelope.key_id != self.key_id {
            return Err(GatewayError::Integrity(format!(
                "secret was encrypted under key {} but cipher holds {}",
                envelope.key_id, self.key_id
            )));
        }

        let nonce = URL_SAFE_NO_PAD
            .decode(envelope.nonce_b64)
            .map_err(|e| GatewayError::Integrity(format!("invalid nonce encoding: {}", e)))?;
        if nonce.len() != NONCE_SIZE {
            return Err(GatewayError::Integrity("invalid nonce length".to_string()));
        }
        let ciphertext = URL_SAFE_NO_PAD
            .decode(envelope.ciphertext_b64)
            .map_err(|e| GatewayError::Integrity(format!("invalid ciphertext encoding: {}", e)))?;

        let plaintext = self
            .aead()?
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
            .map_err(|_| GatewayError::Integrity("secret failed authentication".to_string()))?;

        String::from_utf8(plaintext)
            .map(SecretString::from)
            .map_err(|_| GatewayError::Integrity("secret plaintext is not utf-8".to_string()))
    }
}

struct Envelope<'a> {
    key_id: &'a str,
    nonce_b64: &'a str,
    ciphertext_b64: &'a str,
}

impl<'a> Envelope<'a> {
    fn parse(stored: &'a str) -> PrefabResult<Self> {
        let body = stored
            .strip_prefix(ENVELOPE_PREFIX)
            .ok_or_else(|| GatewayError::Integrity("secret envelope is invalid".to_string()))?;
        let mut parts = body.split(':');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(key_id), Some(nonce_b64), Some(ciphertext_b64), None) if !key_id.is_empty() => {
                Ok(Self {
                    key_id,
                    nonce_b64,
                    ciphertext_b64,
                })
            }
            _ => Err(GatewayError::Integrity(
                "secret envelope is invalid".to_string(),
            )),
        }
    }
}

/// Key fingerprint recorded in an envelope, if it is well formed.
pub fn envelope_key_id(stored: &str) -> Option<&str> {
    Envelope::parse(stored).ok().map(|e| e.key_id)
}

/// Build cipher contexts for a rotation from `old` to `new` material.
///
/// Returns `(old_cipher, new_cipher)`.
pub fn rotate_key(old: &SecretString, new: &SecretString) -> (SecretCipher, SecretCipher) {
    (
        SecretCipher::from_material(old),
        SecretCipher::from_material(new),
    )
}

/// Current cipher plus, during a rotation, the previous one.
#[derive(Debug, Clone)]
pub struct KeyRing {
    current: SecretCipher,
    previous: Option<SecretCipher>,
}

impl KeyRing {
    pub fn new(current: &SecretString, previous: Option<&SecretString>) -> Self {
        match previous {
            Some(old) => {
                let (previous, current) = rotate_key(old, current);
                Self {
                    current,
                    previous: Some(previous),
                }
            }
            None => Self {
                current: SecretCipher::from_material(current),
                previous: None,
            },
        }
    }

    pub fn current(&self) -> &SecretCipher {
        &self.current
    }

    pub fn current_key_id(&self) -> &str {
        self.current.key_id()
    }

    pub fn encrypt(&self, plaintext: &str) -> PrefabResult<String> {
        self.current.encrypt(plaintext)
    }

    /// Decrypt with whichever configured key the envelope names.
    pub fn decrypt(&self, stored: &str) -> PrefabResult<SecretString> {
        let key_id = envelope_key_id(stored)
            .ok_or_else(|| GatewayError::Integrity("secret envelope is invalid".to_string()))?;
        if key_id == self.current.key_id {
            return self.current.decrypt(stored);
        }
        match &self.previous {
            Some(previous) if previous.key_id == key_id => previous.decrypt(stored),
            _ => Err(GatewayError::Integrity(format!(
                "secret key {} is not configured",
                key_id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prefab_core::ErrorKind;
    use proptest::prelude::*;

    fn material(s: &str) -> SecretString {
        SecretString::from(s)
    }

    #[test]
    fn test_encrypt_decrypt() {
        let cipher = SecretCipher::from_material(&material("key-one"));
        let stored = cipher.encrypt("sk-weather-123").unwrap();
        assert!(stored.starts_with("enc:v1:"));
        assert!(!stored.contains("sk-weather-123"));
        assert_eq!(cipher.decrypt(&stored).unwrap().expose_secret(), "sk-weather-123");
    }

    #[test]
    fn test_nonce_is_fresh() {
        let cipher = SecretCipher::from_material(&material("key-one"));
        assert_ne!(cipher.encrypt("same").unwrap(), cipher.encrypt("same").unwrap());
    }

    #[test]
    fn test_key_id_is_stable_and_distinct() {
        let a = SecretCipher::from_material(&material("key-one"));
        let b = SecretCipher::from_material(&material("key-one"));
        let c = SecretCipher::from_material(&material("key-two"));
        assert_eq!(a.key_id(), b.key_id());
        assert_ne!(a.key_id(), c.key_id());
        assert_eq!(a.key_id().len(), KEY_FINGERPRINT_HEX_LEN);
    }

    #[test]
    fn test_wrong_key_is_integrity_error() {
        let a = SecretCipher::from_material(&material("key-one"));
        let b = SecretCipher::from_material(&material("key-two"));
        let stored = a.encrypt("value").unwrap();
        assert_eq!(b.decrypt(&stored).unwrap_err().kind(), ErrorKind::Integrity);
    }

    #[test]
    fn test_tampered_ciphertext_is_integrity_error() {
        let cipher = SecretCipher::from_material(&material("key-one"));
        let stored = cipher.encrypt("value").unwrap();
        let mut tampered = stored.clone();
        let last = tampered.pop().unwrap();
        tampered.push(if last == 'A' { 'B' } else { 'A' });
        let err = cipher.decrypt(&tampered).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Integrity);

        let err = cipher.decrypt("plaintext-value").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Integrity);
    }

    #[test]
    fn test_debug_redacts_key() {
        let cipher = SecretCipher::from_material(&material("key-one"));
        assert!(format!("{:?}", cipher).contains("REDACTED"));
    }

    #[test]
    fn test_rotation_keeps_old_ciphertext_readable() {
        let old = material("old-material");
        let new = material("new-material");
        let (old_cipher, new_cipher) = rotate_key(&old, &new);
        let legacy = old_cipher.encrypt("legacy").unwrap();

        let ring = KeyRing::new(&new, Some(&old));
        assert_eq!(ring.current_key_id(), new_cipher.key_id());
        assert_eq!(ring.decrypt(&legacy).unwrap().expose_secret(), "legacy");

        let fresh = ring.encrypt("fresh").unwrap();
        assert_eq!(envelope_key_id(&fresh), Some(new_cipher.key_id()));

        let without_previous = KeyRing::new(&new, None);
        assert_eq!(
            without_previous.decrypt(&legacy).unwrap_err().kind(),
            ErrorKind::Integrity
        );
    }

    proptest! {
        #[test]
        fn prop_roundtrip_any_utf8(value in "\\PC{0,64}", key in "[a-z0-9]{1,32}") {
            let cipher = SecretCipher::from_material(&material(&key));
            let stored = cipher.encrypt(&value).unwrap();
            let plain = cipher.decrypt(&stored).unwrap();
            prop_assert_eq!(plain.expose_secret(), value.as_str());
        }
    }
}
