// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! ed25519 keys, signatures and hashes in NEAR's string and borsh forms.
//!
//! String form is `ed25519:<base58>`. Borsh form is a one-byte key type
//! followed by the raw key or signature bytes.

use std::fmt;
use std::str::FromStr;

use borsh::{BorshDeserialize, BorshSerialize};
use ring::{
    rand::{SecureRandom, SystemRandom},
    signature::{self, Ed25519KeyPair, KeyPair},
};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::WalletError;

const ED25519_PREFIX: &str = "ed25519";
pub const PUBLIC_KEY_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 64;
const SEED_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
#[borsh(use_discriminant = true)]
#[repr(u8)]
pub enum KeyType {
    Ed25519 = 0,
}

/// Split `ed25519:<base58>` (the prefix is optional) and decode the payload.
fn decode_key_string(raw: &str) -> Result<Vec<u8>, WalletError> {
    let payload = match raw.split_once(':') {
        Some((prefix, payload)) if prefix.eq_ignore_ascii_case(ED25519_PREFIX) => payload,
        Some((prefix, _)) => {
            return Err(WalletError::InvalidKey(format!("unsupported key type {prefix}")))
        }
        None => raw,
    };
    bs58::decode(payload)
        .into_vec()
        .map_err(|e| WalletError::InvalidKey(e.to_string()))
}

fn to_array<const N: usize>(bytes: &[u8], what: &str) -> Result<[u8; N], WalletError> {
    bytes.try_into().map_err(|_| {
        WalletError::InvalidKey(format!("{what} must be {N} bytes, got {}", bytes.len()))
    })
}

macro_rules! string_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = <String as Deserialize>::deserialize(deserializer)?;
                raw.parse().map_err(de::Error::custom)
            }
        }
    };
}

// =============================================================================
// PublicKey
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct PublicKey {
    key_type: KeyType,
    data: [u8; PUBLIC_KEY_LEN],
}

impl PublicKey {
    pub fn from_bytes(data: [u8; PUBLIC_KEY_LEN]) -> Self {
        Self {
            key_type: KeyType::Ed25519,
            data,
        }
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.data
    }

    /// Implicit account id: lowercase hex of the key bytes.
    pub fn implicit_account_id(&self) -> String {
        hex::encode(self.data)
    }

    pub fn verify(&self, message: &[u8], sig: &Signature) -> bool {
        signature::UnparsedPublicKey::new(&signature::ED25519, &self.data)
            .verify(message, &sig.data)
            .is_ok()
    }
}

impl FromStr for PublicKey {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = decode_key_string(s)?;
        Ok(Self::from_bytes(to_array(&bytes, "public key")?))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{ED25519_PREFIX}:{}", bs58::encode(self.data).into_string())
    }
}

string_serde!(PublicKey);

/// Implicit account id for a key in string form.
pub fn implicit_account_id(public_key: &str) -> Result<String, WalletError> {
    Ok(public_key.parse::<PublicKey>()?.implicit_account_id())
}

// =============================================================================
// SecretKey
// =============================================================================

/// ed25519 secret key. String form carries seed and public key (64 bytes).
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey {
    seed: [u8; SEED_LEN],
    public: PublicKey,
}

impl SecretKey {
    pub fn from_seed(seed: [u8; SEED_LEN]) -> Result<Self, WalletError> {
        let pair = Ed25519KeyPair::from_seed_unchecked(&seed)
            .map_err(|e| WalletError::InvalidKey(e.to_string()))?;
        let public = to_array(pair.public_key().as_ref(), "public key")?;
        Ok(Self {
            seed,
            public: PublicKey::from_bytes(public),
        })
    }

    pub fn generate() -> Result<Self, WalletError> {
        let mut seed = [0u8; SEED_LEN];
        SystemRandom::new()
            .fill(&mut seed)
            .map_err(|_| WalletError::Signing("random number generator failure".into()))?;
        Self::from_seed(seed)
    }

    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    pub fn sign(&self, message: &[u8]) -> Result<Signature, WalletError> {
        let pair = Ed25519KeyPair::from_seed_and_public_key(&self.seed, self.public.as_bytes())
            .map_err(|e| WalletError::InvalidKey(e.to_string()))?;
        let sig = pair.sign(message);
        Ok(Signature::from_bytes(to_array(sig.as_ref(), "signature")?))
    }
}

impl FromStr for SecretKey {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = decode_key_string(s)?;
        let (seed, public) = match bytes.len() {
            SEED_LEN => (to_array(&bytes, "seed")?, None),
            64 => (
                to_array(&bytes[..SEED_LEN], "seed")?,
                Some(to_array::<PUBLIC_KEY_LEN>(&bytes[SEED_LEN..], "public key")?),
            ),
            n => {
                return Err(WalletError::InvalidKey(format!(
                    "secret key must be 32 or 64 bytes, got {n}"
                )))
            }
        };
        let key = Self::from_seed(seed)?;
        if public.is_some_and(|p| p != key.public.data) {
            return Err(WalletError::InvalidKey(
                "secret key does not match its public key".into(),
            ));
        }
        Ok(key)
    }
}

impl fmt::Display for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut bytes = [0u8; 64];
        bytes[..SEED_LEN].copy_from_slice(&self.seed);
        bytes[SEED_LEN..].copy_from_slice(self.public.as_bytes());
        write!(f, "{ED25519_PREFIX}:{}", bs58::encode(bytes).into_string())
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretKey")
            .field("public", &self.public.to_string())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Signature
// =============================================================================

#[derive(Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Signature {
    key_type: KeyType,
    data: [u8; SIGNATURE_LEN],
}

impl Signature {
    pub fn from_bytes(data: [u8; SIGNATURE_LEN]) -> Self {
        Self {
            key_type: KeyType::Ed25519,
            data,
        }
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LEN] {
        &self.data
    }
}

impl FromStr for Signature {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = decode_key_string(s)?;
        Ok(Self::from_bytes(to_array(&bytes, "signature")?))
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{ED25519_PREFIX}:{}", bs58::encode(self.data).into_string())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({self})")
    }
}

string_serde!(Signature);

// =============================================================================
// CryptoHash
// =============================================================================

/// SHA-256 digest, base58 in string form (block hashes, transaction hashes).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, BorshSerialize, BorshDeserialize)]
pub struct CryptoHash(pub [u8; 32]);

impl CryptoHash {
    pub fn digest(bytes: &[u8]) -> Self {
        use sha2::{Digest, Sha256};
        Self(Sha256::digest(bytes).into())
    }
}

impl FromStr for CryptoHash {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| WalletError::InvalidKey(e.to_string()))?;
        Ok(Self(to_array(&bytes, "hash")?))
    }
}

impl fmt::Display for CryptoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for CryptoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CryptoHash({self})")
    }
}

string_serde!(CryptoHash);
