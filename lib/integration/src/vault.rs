//! Credential vault: at-rest encryption and display masking.
//!
//! Blobs are `v1:` followed by base64 of `nonce || ciphertext || tag`,
//! produced by AES-256-GCM with a fresh random 96-bit nonce per call.
//! The plaintext of a credential map blob is its JSON object form.

use crate::credential::CredentialMap;
use crate::error::VaultError;
use aes_gcm::{
    Aes256Gcm, Key,
    aead::{Aead, KeyInit, OsRng, Payload},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64_STANDARD};
use rootcause::prelude::Report;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;

const BLOB_PREFIX: &str = "v1:";
const KEY_LENGTH: usize = 32;
const NONCE_LENGTH: usize = 12;
const TAG_LENGTH: usize = 16;
const AAD: &[u8] = b"easemail-credential-vault-v1";

/// Symmetric encryption for stored credentials.
#[derive(Clone)]
pub struct CredentialVault {
    cipher: Aes256Gcm,
}

impl CredentialVault {
    /// Creates a vault from a raw 32-byte key.
    #[must_use]
    pub fn new(key: [u8; KEY_LENGTH]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
        }
    }

    /// Creates a vault from a base64-encoded 32-byte key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is not valid base64 or not 32 bytes long.
    pub fn from_base64(encoded: &str) -> Result<Self, Report<VaultError>> {
        let bytes = BASE64_STANDARD
            .decode(encoded.trim())
            .map_err(|e| VaultError::InvalidKey {
                reason: format!("invalid base64: {e}"),
            })?;
        let key: [u8; KEY_LENGTH] = bytes.try_into().map_err(|b: Vec<u8>| VaultError::InvalidKey {
            reason: format!("key must be {KEY_LENGTH} bytes, got {}", b.len()),
        })?;
        Ok(Self::new(key))
    }

    /// Encrypts a credential map.
    pub fn encrypt(&self, credentials: &CredentialMap) -> Result<String, Report<VaultError>> {
        let plaintext = serde_json::to_vec(credentials).map_err(|e| VaultError::EncryptionFailed {
            reason: format!("failed to serialize credentials: {e}"),
        })?;
        self.seal(&plaintext)
    }

    /// Decrypts a credential map blob.
    ///
    /// `null` fields are dropped; numbers and booleans are kept in their
    /// string form.
    pub fn decrypt(&self, blob: &str) -> Result<CredentialMap, Report<VaultError>> {
        let plaintext = self.open(blob)?;
        let fields: BTreeMap<String, JsonValue> =
            serde_json::from_slice(&plaintext).map_err(|e| VaultError::InvalidFormat {
                reason: format!("plaintext is not a JSON object: {e}"),
            })?;

        Ok(fields
            .into_iter()
            .filter_map(|(key, value)| match value {
                JsonValue::Null => None,
                JsonValue::String(s) => Some((key, s)),
                other => Some((key, other.to_string())),
            })
            .collect())
    }

    /// Encrypts a single secret such as an OAuth token.
    pub fn encrypt_secret(&self, secret: &str) -> Result<String, Report<VaultError>> {
        self.seal(secret.as_bytes())
    }

    /// Decrypts a single secret.
    pub fn decrypt_secret(&self, blob: &str) -> Result<String, Report<VaultError>> {
        let plaintext = self.open(blob)?;
        String::from_utf8(plaintext).map_err(|_| {
            VaultError::InvalidFormat {
                reason: "secret is not valid UTF-8".to_string(),
            }
            .into()
        })
    }

    fn seal(&self, plaintext: &[u8]) -> Result<String, Report<VaultError>> {
        let mut nonce = [0u8; NONCE_LENGTH];
        use aes_gcm::aead::rand_core::RngCore as _;
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(
                (&nonce).into(),
                Payload {
                    msg: plaintext,
                    aad: AAD,
                },
            )
            .map_err(|_| VaultError::EncryptionFailed {
                reason: "cipher rejected payload".to_string(),
            })?;

        let mut payload = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&ciphertext);
        Ok(format!("{BLOB_PREFIX}{}", BASE64_STANDARD.encode(payload)))
    }

    fn open(&self, blob: &str) -> Result<Vec<u8>, Report<VaultError>> {
        let encoded = blob
            .strip_prefix(BLOB_PREFIX)
            .ok_or_else(|| VaultError::InvalidFormat {
                reason: "missing version prefix".to_string(),
            })?;
        let raw = BASE64_STANDARD
            .decode(encoded)
            .map_err(|_| VaultError::InvalidFormat {
                reason: "payload is not valid base64".to_string(),
            })?;
        if raw.len() < NONCE_LENGTH + TAG_LENGTH {
            return Err(VaultError::InvalidFormat {
                reason: "payload is truncated".to_string(),
            }
            .into());
        }

        let (nonce, ciphertext) = raw.split_at(NONCE_LENGTH);
        self.cipher
            .decrypt(
                nonce.into(),
                Payload {
                    msg: ciphertext,
                    aad: AAD,
                },
            )
            .map_err(|_| {
                VaultError::DecryptionFailed {
                    reason: "integrity check failed".to_string(),
                }
                .into()
            })
    }
}

impl fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialVault")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Masks a secret for display: values longer than twelve characters keep
/// their first and last four characters, shorter ones are fully hidden.
#[must_use]
pub fn mask(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 12 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}****{tail}")
}

/// Masks every value of a credential map.
#[must_use]
pub fn mask_map(credentials: &CredentialMap) -> BTreeMap<String, String> {
    credentials
        .iter()
        .map(|(k, v)| (k.to_string(), mask(v)))
        .collect()
}
