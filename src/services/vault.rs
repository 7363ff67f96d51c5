use crate::entities::provider_credentials;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chacha20poly1305::{
    AeadCore, ChaCha20Poly1305, Key, Nonce,
    aead::{Aead, KeyInit, OsRng},
};
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("encryption failed: {0}")]
    Encrypt(String),

    /// Tampered ciphertext or wrong key. Never means "no token on file".
    #[error("decryption failed: {0}")]
    Decrypt(String),

    #[error("refresh token must not be empty")]
    EmptyRefreshToken,
}

/// Plaintext OAuth pair. Only lives for the duration of one call.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenPair { .. }")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Encrypts provider token pairs at rest with ChaCha20-Poly1305.
/// The key is derived once at startup and never mutated.
#[derive(Clone)]
pub struct CredentialVault {
    key: [u8; 32],
}

impl std::fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CredentialVault { key: <redacted> }")
    }
}

impl CredentialVault {
    pub fn new(secret: &str) -> Self {
        Self {
            key: Self::derive_key(secret),
        }
    }

    /// Derive the 32-byte vault key from the configured secret
    fn derive_key(secret: &str) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(secret.as_bytes());
        hasher.update(b"drive-access-core-credential-vault");
        *hasher.finalize().as_bytes()
    }

    pub fn encrypt(&self, pair: &TokenPair) -> Result<EncryptedPair, VaultError> {
        if pair.refresh_token.is_empty() {
            return Err(VaultError::EmptyRefreshToken);
        }
        Ok(EncryptedPair {
            access_token: self.seal(pair.access_token.as_bytes())?,
            refresh_token: self.seal(pair.refresh_token.as_bytes())?,
        })
    }

    pub fn decrypt(&self, record: &provider_credentials::Model) -> Result<TokenPair, VaultError> {
        let access_token = self.open(&record.encrypted_access_token)?;
        let refresh_token = self.open(&record.encrypted_refresh_token)?;
        if refresh_token.is_empty() {
            return Err(VaultError::EmptyRefreshToken);
        }
        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    /// Decrypt a single sealed value (used to keep a stored refresh token
    /// when the provider omits one on rotation).
    pub fn open(&self, encoded: &str) -> Result<String, VaultError> {
        let decoded = BASE64
            .decode(encoded)
            .map_err(|e| VaultError::Decrypt(format!("invalid base64: {}", e)))?;

        if decoded.len() < NONCE_LEN + TAG_LEN {
            return Err(VaultError::Decrypt("invalid ciphertext length".to_string()));
        }

        let nonce = Nonce::from_slice(&decoded[..NONCE_LEN]);
        let cipher = ChaCha20Poly1305::new(&Key::from(self.key));
        let plaintext = cipher
            .decrypt(nonce, &decoded[NONCE_LEN..])
            .map_err(|e| VaultError::Decrypt(e.to_string()))?;

        String::from_utf8(plaintext).map_err(|_| VaultError::Decrypt("invalid utf-8".to_string()))
    }

    fn seal(&self, data: &[u8]) -> Result<String, VaultError> {
        let cipher = ChaCha20Poly1305::new(&Key::from(self.key));
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng); // 96-bits
        let ciphertext = cipher
            .encrypt(&nonce, data)
            .map_err(|e| VaultError::Encrypt(e.to_string()))?;

        let mut combined = Vec::with_capacity(nonce.len() + ciphertext.len());
        combined.extend_from_slice(&nonce);
        combined.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(combined))
    }

    pub fn is_expired(record: &provider_credentials::Model, skew_seconds: i64) -> bool {
        Self::expires_within(record.expires_at, skew_seconds, Utc::now())
    }

    /// True when `expires_at` falls within `skew_seconds` of `now`
    pub fn expires_within(
        expires_at: DateTime<Utc>,
        skew_seconds: i64,
        now: DateTime<Utc>,
    ) -> bool {
        expires_at <= now + Duration::seconds(skew_seconds.max(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(vault: &CredentialVault, pair: &TokenPair) -> provider_credentials::Model {
        let sealed = vault.encrypt(pair).unwrap();
        provider_credentials::Model {
            user_id: "u1".to_string(),
            encrypted_access_token: sealed.access_token,
            encrypted_refresh_token: sealed.refresh_token,
            expires_at: Utc::now() + Duration::hours(1),
            last_used_at: None,
            requires_reauth: false,
            provider_email: None,
            created_at: None,
            updated_at: None,
        }
    }

    fn pair() -> TokenPair {
        TokenPair {
            access_token: "ya29.access".to_string(),
            refresh_token: "1//refresh".to_string(),
        }
    }

    #[test]
    fn test_encrypt_decrypt_cycle() {
        let vault = CredentialVault::new("k1");
        let rec = record(&vault, &pair());
        assert!(!rec.encrypted_access_token.contains("ya29"));
        assert_eq!(vault.decrypt(&rec).unwrap(), pair());
    }

    #[test]
    fn test_nonce_is_fresh_per_encryption() {
        let vault = CredentialVault::new("k1");
        let a = vault.encrypt(&pair()).unwrap();
        let b = vault.encrypt(&pair()).unwrap();
        assert_ne!(a.access_token, b.access_token);
    }

    #[test]
    fn test_wrong_key_is_decrypt_error() {
        let rec = record(&CredentialVault::new("k1"), &pair());
        let other = CredentialVault::new("k2");
        assert!(matches!(other.decrypt(&rec), Err(VaultError::Decrypt(_))));
    }

    #[test]
    fn test_tampered_ciphertext_is_decrypt_error() {
        let vault = CredentialVault::new("k1");
        let mut rec = record(&vault, &pair());
        let mut raw = BASE64.decode(&rec.encrypted_access_token).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        rec.encrypted_access_token = BASE64.encode(raw);
        assert!(matches!(vault.decrypt(&rec), Err(VaultError::Decrypt(_))));
    }

    #[test]
    fn test_empty_refresh_token_rejected() {
        let vault = CredentialVault::new("k1");
        let res = vault.encrypt(&TokenPair {
            access_token: "a".to_string(),
            refresh_token: String::new(),
        });
        assert!(matches!(res, Err(VaultError::EmptyRefreshToken)));
    }

    #[test]
    fn test_expiry_skew() {
        let now = Utc::now();
        assert!(CredentialVault::expires_within(now + Duration::seconds(30), 60, now));
        assert!(CredentialVault::expires_within(now - Duration::seconds(1), 0, now));
        assert!(!CredentialVault::expires_within(now + Duration::seconds(61), 60, now));
    }

    #[test]
    fn test_debug_redacts() {
        let vault = CredentialVault::new("k1");
        assert_eq!(format!("{:?}", vault), "CredentialVault { key: <redacted> }");
        assert_eq!(format!("{:?}", pair()), "TokenPair { .. }");
    }
}
