//! Block addresses
//!
//! A [`Location`] names one slot in the content-addressed store. Locations are
//! allocated before any content is written so a file's chunk chain is known up
//! front.

use crate::identity::PublicKeyHash;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Size of a map key
pub const MAP_KEY_SIZE: usize = 32;

/// Random label of a slot within a writer's key space
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MapKey([u8; MAP_KEY_SIZE]);

impl MapKey {
    pub fn random() -> Self {
        let mut bytes = [0u8; MAP_KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; MAP_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; MAP_KEY_SIZE] {
        &self.0
    }

    pub fn to_base58(&self) -> String {
        bs58::encode(&self.0).into_string()
    }
}

impl fmt::Debug for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MapKey({})", &self.to_base58()[..8])
    }
}

/// Address of one block: owner, writer and map key
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub owner: PublicKeyHash,
    pub writer: PublicKeyHash,
    pub map_key: MapKey,
}

impl Location {
    pub fn new(owner: PublicKeyHash, writer: PublicKeyHash, map_key: MapKey) -> Self {
        Self {
            owner,
            writer,
            map_key,
        }
    }

    /// A fresh location in the same key space
    pub fn sibling(&self) -> Self {
        Self::new(self.owner, self.writer, MapKey::random())
    }

    /// Same key space, given map key
    pub fn with_map_key(&self, map_key: MapKey) -> Self {
        Self::new(self.owner, self.writer, map_key)
    }

    /// Allocate `count` fresh locations in one key space
    pub fn allocate(owner: PublicKeyHash, writer: PublicKeyHash, count: usize) -> Vec<Location> {
        (0..count)
            .map(|_| Location::new(owner, writer, MapKey::random()))
            .collect()
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Location({:?}/{:?}/{:?})",
            self.owner, self.writer, self.map_key
        )
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.writer, self.map_key.to_base58())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::SigningKeyPair;

    #[test]
    fn test_allocate_shares_key_space() {
        let owner = SigningKeyPair::generate().public_hash();
        let writer = SigningKeyPair::generate().public_hash();
        let locations = Location::allocate(owner, writer, 4);

        assert_eq!(locations.len(), 4);
        assert!(locations.iter().all(|l| l.owner == owner && l.writer == writer));

        let mut keys: Vec<_> = locations.iter().map(|l| l.map_key).collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), 4);
    }
}
