//! Cryptographic primitives: password hashing, field encryption, session
//! tokens, API token digests, and webhook signing.
//!
//! Key material lives in [`crate::config::SecurityConfig`] and is immutable
//! after startup. Nothing in this module logs secrets and errors carry no
//! key material.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use anyhow::{anyhow, bail, Result};
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use base64::engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD as BASE64_URL};
use base64::Engine;
use hmac::{Hmac, Mac};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const NONCE_SIZE: usize = 12;
const API_TOKEN_BYTES: usize = 32;

// ── Password hashing ────────────────────────────────────────────────────

/// Hash a password with Argon2id and a per-password random salt. The salt
/// is embedded in the PHC digest string.
pub fn hash_password(plain: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let digest = Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| anyhow!("password hashing failed: {}", e))?;
    Ok(digest.to_string())
}

/// Verify a password against a stored digest. Returns false on any
/// mismatch or malformed digest.
pub fn verify_password(plain: &str, digest: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(digest) else {
        return false;
    };
    Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok()
}

// ── Field encryption (AES-256-GCM) ──────────────────────────────────────

/// Authenticated encryption for sensitive columns (bot provider
/// credentials). The ciphertext format is `v1:<nonce_b64>:<ct_b64>`; the
/// version tag leaves room for key rotation later.
#[derive(Clone)]
pub struct FieldCipher {
    cipher: Aes256Gcm,
}

impl FieldCipher {
    pub fn new(key: &[u8; 32]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(key);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    pub fn encrypt_value(&self, plain: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plain.as_bytes())
            .map_err(|_| anyhow!("encryption failed"))?;
        Ok(format!(
            "v1:{}:{}",
            BASE64.encode(nonce_bytes),
            BASE64.encode(ciphertext)
        ))
    }

    pub fn decrypt_value(&self, stored: &str) -> Result<String> {
        let parts: Vec<&str> = stored.splitn(3, ':').collect();
        if parts.len() != 3 || parts[0] != "v1" {
            bail!("invalid ciphertext format");
        }
        let nonce_bytes = BASE64
            .decode(parts[1])
            .map_err(|_| anyhow!("invalid ciphertext nonce"))?;
        if nonce_bytes.len() != NONCE_SIZE {
            bail!("invalid ciphertext nonce");
        }
        let ciphertext = BASE64
            .decode(parts[2])
            .map_err(|_| anyhow!("invalid ciphertext body"))?;
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|_| anyhow!("decryption failed"))?;
        String::from_utf8(plain).map_err(|_| anyhow!("decrypted value is not UTF-8"))
    }
}

// ── Session tokens (HS256) ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// User id
    pub sub: String,
    /// Tenant id
    pub tid: String,
    pub role: String,
    pub exp: i64,
    pub iat: i64,
}

/// Verification failures. `Expired` is surfaced distinctly for UX; every
/// other failure collapses into `Invalid` to avoid an oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    Expired,
    Invalid,
}

#[derive(Clone)]
pub struct SessionSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    expire_minutes: i64,
}

impl SessionSigner {
    pub fn new(signing_key: &str, expire_minutes: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(signing_key.as_bytes()),
            decoding: DecodingKey::from_secret(signing_key.as_bytes()),
            expire_minutes,
        }
    }

    pub fn sign_session(&self, user_id: Uuid, tenant_id: Uuid, role: &str) -> Result<String> {
        let now = chrono::Utc::now();
        let claims = SessionClaims {
            sub: user_id.to_string(),
            tid: tenant_id.to_string(),
            role: role.to_string(),
            iat: now.timestamp(),
            exp: (now + chrono::Duration::minutes(self.expire_minutes)).timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| anyhow!("session signing failed: {}", e))
    }

    pub fn verify_session(&self, token: &str) -> Result<SessionClaims, SessionError> {
        let validation = Validation::default();
        match decode::<SessionClaims>(token, &self.decoding, &validation) {
            Ok(data) => Ok(data.claims),
            Err(err) => match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => Err(SessionError::Expired),
                _ => Err(SessionError::Invalid),
            },
        }
    }
}

// ── API tokens ──────────────────────────────────────────────────────────

/// Generate an opaque API token with 256 bits of entropy. The base64url
/// alphabet contains no `.`, which is what distinguishes opaque tokens
/// from signed session tokens at auth time.
pub fn generate_api_token() -> String {
    let mut bytes = [0u8; API_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    BASE64_URL.encode(bytes)
}

/// Deterministic SHA-256 digest of an opaque token, hex encoded. Fast and
/// keyless so a single indexed lookup resolves the token; the raw token's
/// entropy makes brute force infeasible.
pub fn hash_api_token(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Constant-time equality for digests and signatures.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

// ── Webhook signing ─────────────────────────────────────────────────────

/// HMAC-SHA256 over the payload body, hex encoded.
pub fn hmac_sign(secret: &str, body: &[u8]) -> String {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(body);
    let digest = mac.finalize().into_bytes();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_round_trip() {
        let digest = hash_password("correct horse battery").unwrap();
        assert!(verify_password("correct horse battery", &digest));
        assert!(!verify_password("wrong", &digest));
    }

    #[test]
    fn test_password_salts_differ() {
        let a = hash_password("same").unwrap();
        let b = hash_password("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_field_cipher_round_trip() {
        let cipher = FieldCipher::new(&[7u8; 32]);
        let ct = cipher.encrypt_value(r#"{"api_key":"sk-test"}"#).unwrap();
        assert!(ct.starts_with("v1:"));
        assert_eq!(cipher.decrypt_value(&ct).unwrap(), r#"{"api_key":"sk-test"}"#);
    }

    #[test]
    fn test_field_cipher_rejects_tampering() {
        let cipher = FieldCipher::new(&[7u8; 32]);
        let ct = cipher.encrypt_value("secret").unwrap();
        let mut tampered = ct.clone();
        tampered.pop();
        tampered.push('A');
        assert!(cipher.decrypt_value(&tampered).is_err());
    }

    #[test]
    fn test_field_cipher_wrong_key_fails() {
        let cipher = FieldCipher::new(&[7u8; 32]);
        let other = FieldCipher::new(&[8u8; 32]);
        let ct = cipher.encrypt_value("secret").unwrap();
        assert!(other.decrypt_value(&ct).is_err());
    }

    #[test]
    fn test_session_round_trip() {
        let signer = SessionSigner::new("a-signing-key-that-is-long-enough!!", 60);
        let user = Uuid::new_v4();
        let tenant = Uuid::new_v4();
        let token = signer.sign_session(user, tenant, "admin").unwrap();
        assert!(token.contains('.'));
        let claims = signer.verify_session(&token).unwrap();
        assert_eq!(claims.sub, user.to_string());
        assert_eq!(claims.tid, tenant.to_string());
        assert_eq!(claims.role, "admin");
    }

    #[test]
    fn test_session_wrong_key_is_invalid() {
        let signer = SessionSigner::new("a-signing-key-that-is-long-enough!!", 60);
        let other = SessionSigner::new("a-different-key-that-is-long-enough", 60);
        let token = signer
            .sign_session(Uuid::new_v4(), Uuid::new_v4(), "member")
            .unwrap();
        assert!(matches!(
            other.verify_session(&token),
            Err(SessionError::Invalid)
        ));
    }

    #[test]
    fn test_api_token_shape() {
        let token = generate_api_token();
        // 32 bytes base64url without padding
        assert_eq!(token.len(), 43);
        assert!(!token.contains('.'));
    }

    #[test]
    fn test_api_token_hash_deterministic() {
        let token = generate_api_token();
        assert_eq!(hash_api_token(&token), hash_api_token(&token));
        assert_ne!(hash_api_token(&token), hash_api_token("other"));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "abcd"));
    }

    #[test]
    fn test_hmac_sign_known_vector() {
        // RFC 4231 test case 2
        let sig = hmac_sign("Jefe", b"what do ya want for nothing?");
        assert_eq!(
            sig,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }
}
