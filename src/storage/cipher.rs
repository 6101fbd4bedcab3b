// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Password hashing and private-key encryption.
//!
//! - Password hash: `pbkdf2-sha256$<iterations>$<salt b64>$<hash b64>`
//! - Encrypted private key: `base64(salt ‖ nonce ‖ ciphertext ‖ tag)`, with an
//!   AES-256-GCM key derived from the session password by PBKDF2-HMAC-SHA256.

use std::num::NonZeroU32;

use base64ct::{Base64, Encoding};
use ring::{
    aead::{self, Aad, LessSafeKey, Nonce, UnboundKey},
    pbkdf2,
    rand::{SecureRandom, SystemRandom},
};

/// PBKDF2 iterations used for both the password hash and key derivation.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

const SALT_LEN: usize = 16;
const KEY_LEN: usize = 32;
const HASH_PREFIX: &str = "pbkdf2-sha256";

#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    #[error("random number generator failure")]
    Random,

    #[error("malformed ciphertext")]
    Malformed,

    #[error("decryption failed")]
    Decrypt,

    #[error("encryption failed")]
    Encrypt,

    #[error("iteration count must be positive")]
    Iterations,
}

/// Encrypts private keys at rest under the session password.
pub trait KeyCipher: Send + Sync {
    fn encrypt(&self, password: &str, plaintext: &str) -> Result<String, CipherError>;

    fn decrypt(&self, password: &str, ciphertext: &str) -> Result<String, CipherError>;
}

fn random_bytes<const N: usize>(rng: &SystemRandom) -> Result<[u8; N], CipherError> {
    let mut bytes = [0u8; N];
    rng.fill(&mut bytes).map_err(|_| CipherError::Random)?;
    Ok(bytes)
}

fn iterations(count: u32) -> Result<NonZeroU32, CipherError> {
    NonZeroU32::new(count).ok_or(CipherError::Iterations)
}

// =============================================================================
// Password Hash
// =============================================================================

/// Hash a wallet password for the `hashedPassword` key.
pub fn hash_password(password: &str) -> Result<String, CipherError> {
    hash_password_with(password, PBKDF2_ITERATIONS)
}

pub(crate) fn hash_password_with(password: &str, rounds: u32) -> Result<String, CipherError> {
    let rng = SystemRandom::new();
    let salt: [u8; SALT_LEN] = random_bytes(&rng)?;
    let mut hash = [0u8; KEY_LEN];
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations(rounds)?,
        &salt,
        password.as_bytes(),
        &mut hash,
    );
    Ok(format!(
        "{HASH_PREFIX}${rounds}${}${}",
        Base64::encode_string(&salt),
        Base64::encode_string(&hash)
    ))
}

/// Check a password against a stored hash. Malformed hashes never verify.
pub fn verify_password(password: &str, hashed: &str) -> bool {
    let mut parts = hashed.split('$');
    let (Some(HASH_PREFIX), Some(rounds), Some(salt), Some(hash), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return false;
    };
    let Some(rounds) = rounds.parse::<u32>().ok().and_then(NonZeroU32::new) else {
        return false;
    };
    let (Ok(salt), Ok(hash)) = (Base64::decode_vec(salt), Base64::decode_vec(hash)) else {
        return false;
    };
    pbkdf2::verify(
        pbkdf2::PBKDF2_HMAC_SHA256,
        rounds,
        &salt,
        password.as_bytes(),
        &hash,
    )
    .is_ok()
}

// =============================================================================
// AES-256-GCM Key Cipher
// =============================================================================

pub struct AesGcmCipher {
    rounds: NonZeroU32,
    rng: SystemRandom,
}

impl AesGcmCipher {
    pub fn new() -> Self {
        Self {
            rounds: NonZeroU32::new(PBKDF2_ITERATIONS).unwrap_or(NonZeroU32::MIN),
            rng: SystemRandom::new(),
        }
    }

    /// Cipher with a custom PBKDF2 cost. Lower counts are only for tests.
    pub fn with_iterations(rounds: u32) -> Result<Self, CipherError> {
        Ok(Self {
            rounds: iterations(rounds)?,
            rng: SystemRandom::new(),
        })
    }

    fn key(&self, password: &str, salt: &[u8]) -> Result<LessSafeKey, CipherError> {
        let mut key = [0u8; KEY_LEN];
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            self.rounds,
            salt,
            password.as_bytes(),
            &mut key,
        );
        let unbound = UnboundKey::new(&aead::AES_256_GCM, &key).map_err(|_| CipherError::Encrypt)?;
        Ok(LessSafeKey::new(unbound))
    }
}

impl Default for AesGcmCipher {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyCipher for AesGcmCipher {
    fn encrypt(&self, password: &str, plaintext: &str) -> Result<String, CipherError> {
        let salt: [u8; SALT_LEN] = random_bytes(&self.rng)?;
        let nonce_bytes: [u8; aead::NONCE_LEN] = random_bytes(&self.rng)?;
        let key = self.key(password, &salt)?;

        let mut sealed = plaintext.as_bytes().to_vec();
        key.seal_in_place_append_tag(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::empty(),
            &mut sealed,
        )
        .map_err(|_| CipherError::Encrypt)?;

        let mut out = Vec::with_capacity(SALT_LEN + aead::NONCE_LEN + sealed.len());
        out.extend_from_slice(&salt);
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&sealed);
        Ok(Base64::encode_string(&out))
    }

    fn decrypt(&self, password: &str, ciphertext: &str) -> Result<String, CipherError> {
        let raw = Base64::decode_vec(ciphertext).map_err(|_| CipherError::Malformed)?;
        if raw.len() < SALT_LEN + aead::NONCE_LEN + aead::AES_256_GCM.tag_len() {
            return Err(CipherError::Malformed);
        }
        let (salt, rest) = raw.split_at(SALT_LEN);
        let (nonce_bytes, sealed) = rest.split_at(aead::NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes).map_err(|_| CipherError::Malformed)?;

        let key = self.key(password, salt)?;
        let mut buffer = sealed.to_vec();
        let plaintext = key
            .open_in_place(nonce, Aad::empty(), &mut buffer)
            .map_err(|_| CipherError::Decrypt)?;
        String::from_utf8(plaintext.to_vec()).map_err(|_| CipherError::Malformed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_verifies_only_the_right_password() {
        let hashed = hash_password_with("correct horse", 1_000).unwrap();
        assert!(hashed.starts_with("pbkdf2-sha256$1000$"));
        assert!(verify_password("correct horse", &hashed));
        assert!(!verify_password("battery staple", &hashed));
    }

    #[test]
    fn malformed_hashes_never_verify() {
        assert!(!verify_password("x", ""));
        assert!(!verify_password("x", "pbkdf2-sha256$0$AAAA$AAAA"));
        assert!(!verify_password("x", "sha1$1000$AAAA$AAAA"));
        assert!(!verify_password("x", "pbkdf2-sha256$1000$!!$AAAA"));
    }

    #[test]
    fn encrypted_key_opens_with_session_password() {
        let cipher = AesGcmCipher::with_iterations(1_000).unwrap();
        let secret = "ed25519:3D4YudUahN1nawWogh8pAKSj92sUNMdbZGjn7kERKzYoTy8tnFQuwoGUC51DowKqorvkr2pytJSnwuSbsNVfqygr";

        let sealed = cipher.encrypt("pw", secret).unwrap();
        assert_ne!(sealed, secret);
        assert_eq!(cipher.decrypt("pw", &sealed).unwrap(), secret);
        assert!(matches!(cipher.decrypt("other", &sealed), Err(CipherError::Decrypt)));
    }

    #[test]
    fn each_encryption_uses_fresh_salt_and_nonce() {
        let cipher = AesGcmCipher::with_iterations(1_000).unwrap();
        let a = cipher.encrypt("pw", "same").unwrap();
        let b = cipher.encrypt("pw", "same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn truncated_ciphertext_is_rejected() {
        let cipher = AesGcmCipher::with_iterations(1_000).unwrap();
        assert!(matches!(cipher.decrypt("pw", "AAAA"), Err(CipherError::Malformed)));
        assert!(matches!(cipher.decrypt("pw", "%%%"), Err(CipherError::Malformed)));
    }
}
