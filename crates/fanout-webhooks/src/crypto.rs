//! Cryptographic operations for webhook secrets and payload signing.
//!
//! - AES-256-GCM encryption/decryption for endpoint secrets at rest
//! - HMAC-SHA256 signatures over the raw request body

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::WebhookError;

/// Nonce size for AES-GCM (96 bits / 12 bytes).
const NONCE_SIZE: usize = 12;

/// Prefix carried in the signature header value.
const SIGNATURE_PREFIX: &str = "sha256=";

type HmacSha256 = Hmac<Sha256>;

// ---------------------------------------------------------------------------
// AES-256-GCM encryption/decryption (for secrets at rest)
// ---------------------------------------------------------------------------

/// Encrypt a plaintext secret to a base64-encoded string for DB storage.
///
/// Format: base64(nonce || ciphertext || auth_tag)
pub fn encrypt_secret(plaintext: &str, key: &[u8]) -> Result<String, WebhookError> {
    if key.len() != 32 {
        return Err(WebhookError::EncryptionFailed(format!(
            "Invalid key length: expected 32 bytes, got {}",
            key.len()
        )));
    }

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| WebhookError::EncryptionFailed(e.to_string()))?;

    use rand::rngs::OsRng;
    use rand::RngCore;
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| WebhookError::EncryptionFailed(e.to_string()))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);

    Ok(BASE64.encode(&result))
}

/// Decrypt a base64-encoded secret from DB storage back to plaintext.
pub fn decrypt_secret(encoded: &str, key: &[u8]) -> Result<String, WebhookError> {
    if key.len() != 32 {
        return Err(WebhookError::EncryptionFailed(format!(
            "Invalid key length: expected 32 bytes, got {}",
            key.len()
        )));
    }

    let encrypted = BASE64
        .decode(encoded)
        .map_err(|e| WebhookError::EncryptionFailed(format!("Base64 decode failed: {e}")))?;

    if encrypted.len() < NONCE_SIZE + 1 {
        return Err(WebhookError::EncryptionFailed(
            "Invalid encrypted data format".to_string(),
        ));
    }

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| WebhookError::EncryptionFailed(e.to_string()))?;

    let nonce = Nonce::from_slice(&encrypted[..NONCE_SIZE]);
    let ciphertext = &encrypted[NONCE_SIZE..];

    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| WebhookError::EncryptionFailed(e.to_string()))?;

    String::from_utf8(plaintext).map_err(|e| WebhookError::EncryptionFailed(e.to_string()))
}

// ---------------------------------------------------------------------------
// HMAC-SHA256 payload signing
// ---------------------------------------------------------------------------

/// Compute the HMAC-SHA256 signature of a raw request body.
///
/// Returns a hex-encoded digest string.
#[must_use]
pub fn compute_signature(secret: &str, body: &[u8]) -> String {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");

    mac.update(body);

    hex::encode(mac.finalize().into_bytes())
}

/// Signature header value: `sha256=<hex digest>`.
#[must_use]
pub fn signature_header_value(secret: &str, body: &[u8]) -> String {
    format!("{SIGNATURE_PREFIX}{}", compute_signature(secret, body))
}

/// Verify a supplied signature against the recomputed one.
///
/// Accepts values with or without the `sha256=` prefix. Comparison is
/// constant-time to prevent timing attacks.
#[must_use]
pub fn verify_signature(supplied: &str, secret: &str, body: &[u8]) -> bool {
    let supplied = supplied.strip_prefix(SIGNATURE_PREFIX).unwrap_or(supplied);
    let computed = compute_signature(secret, body);
    constant_time_eq(supplied.as_bytes(), computed.as_bytes())
}

/// Constant-time byte comparison via the `subtle` crate.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    a.ct_eq(b).into()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
