//! Public key hashes and signing identities
//!
//! Every block lives in the key space of an owner and a writer, both named by
//! the blake3 hash of an ed25519 verifying key.

use crate::error::{Result, VaultError};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Size of an ed25519 secret seed
pub const SEED_SIZE: usize = 32;

/// Hash of a public signing key
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PublicKeyHash([u8; 32]);

impl PublicKeyHash {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Hash an ed25519 verifying key
    pub fn of(key: &VerifyingKey) -> Self {
        Self(*blake3::hash(key.as_bytes()).as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Base58 form used in logs and paths
    pub fn to_base58(&self) -> String {
        bs58::encode(&self.0).into_string()
    }
}

impl fmt::Debug for PublicKeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKeyHash({})", &self.to_base58()[..8])
    }
}

impl fmt::Display for PublicKeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base58())
    }
}

/// A signing key together with the hash of its public half
#[derive(Clone)]
pub struct SigningKeyPair {
    signing_key: SigningKey,
    public_hash: PublicKeyHash,
}

impl SigningKeyPair {
    /// Generate a fresh random identity
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    /// Rebuild an identity from its 32-byte seed
    pub fn from_seed(seed: &[u8; SEED_SIZE]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(seed))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let public_hash = PublicKeyHash::of(&signing_key.verifying_key());
        Self {
            signing_key,
            public_hash,
        }
    }

    pub fn public_hash(&self) -> PublicKeyHash {
        self.public_hash
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Secret seed; only ever serialized into write capabilities and the
    /// local transaction ledger
    pub fn seed(&self) -> [u8; SEED_SIZE] {
        self.signing_key.to_bytes()
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }
}

/// Check a signature made by the holder of `writer`
pub fn verify_signature(
    writer: &PublicKeyHash,
    key: &VerifyingKey,
    message: &[u8],
    signature: &Signature,
) -> Result<()> {
    if PublicKeyHash::of(key) != *writer {
        return Err(VaultError::PermissionDenied(format!(
            "verifying key does not hash to writer {}",
            writer
        )));
    }
    key.verify(message, signature)
        .map_err(|e| VaultError::PermissionDenied(e.to_string()))
}

impl PartialEq for SigningKeyPair {
    fn eq(&self, other: &Self) -> bool {
        self.public_hash == other.public_hash
    }
}

impl Eq for SigningKeyPair {}

impl fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SigningKeyPair({:?}, [REDACTED])", self.public_hash)
    }
}

impl Serialize for SigningKeyPair {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_bytes(&self.seed())
    }
}

impl<'de> Deserialize<'de> for SigningKeyPair {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bytes: Vec<u8> = Deserialize::deserialize(deserializer)?;
        let seed: [u8; SEED_SIZE] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| serde::de::Error::custom("Invalid seed length"))?;
        Ok(SigningKeyPair::from_seed(&seed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_roundtrip() {
        let pair = SigningKeyPair::generate();
        let restored = SigningKeyPair::from_seed(&pair.seed());
        assert_eq!(pair.public_hash(), restored.public_hash());
    }

    #[test]
    fn test_sign_and_verify() {
        let pair = SigningKeyPair::generate();
        let sig = pair.sign(b"message");
        verify_signature(&pair.public_hash(), &pair.verifying_key(), b"message", &sig).unwrap();

        let other = SigningKeyPair::generate();
        assert!(verify_signature(&other.public_hash(), &pair.verifying_key(), b"message", &sig)
            .is_err());
    }

    #[test]
    fn test_bincode_roundtrip() {
        let pair = SigningKeyPair::generate();
        let bytes = bincode::serialize(&pair).unwrap();
        let restored: SigningKeyPair = bincode::deserialize(&bytes).unwrap();
        assert_eq!(pair, restored);
    }
}
