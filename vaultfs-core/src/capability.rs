//! Capabilities and their fixed-size record encoding
//!
//! A capability is an unforgeable token: knowing the location and read key of
//! a file is what it means to be allowed to read it. The write variant also
//! carries the writer's signing seed.
//!
//! Records written to a sharing log are a deterministic CBOR map whose values
//! are all 32-byte byte strings, in this order:
//!
//! ```text
//! A4|A5                     map header (4 entries read, 5 entries write)
//! 65 "owner"   58 20 <32>   owner public key hash
//! 66 "writer"  58 20 <32>   writer public key hash
//! 66 "mapkey"  58 20 <32>   map key
//! 64 "rkey"    58 20 <32>   read base key
//! 64 "wkey"    58 20 <32>   signing seed (write records only)
//! ```
//!
//! which is 162 bytes for a read record and 201 bytes for a write record.

use crate::crypto::{SymmetricKey, KEY_SIZE};
use crate::error::{Result, VaultError};
use crate::identity::{PublicKeyHash, SigningKeyPair};
use crate::location::{Location, MapKey};
use serde::{Deserialize, Serialize};

/// Serialized size of a read-only capability
pub const READ_CAPABILITY_SIZE: usize = 162;

/// Serialized size of a writable capability
pub const WRITE_CAPABILITY_SIZE: usize = 201;

/// Records held by each sharing file before rolling over to the next one
pub const DEFAULT_CAPS_PER_FILE: u64 = 10_000;

const MAP_HEADER_READ: u8 = 0xA4;
const MAP_HEADER_WRITE: u8 = 0xA5;
const TEXT_MAJOR: u8 = 0x60;
const BYTES_ONE_BYTE_LEN: u8 = 0x58;
const VALUE_LEN: u8 = 32;

const KEY_OWNER: &[u8] = b"owner";
const KEY_WRITER: &[u8] = b"writer";
const KEY_MAP_KEY: &[u8] = b"mapkey";
const KEY_READ: &[u8] = b"rkey";
const KEY_WRITE: &[u8] = b"wkey";

/// Read access to one file or directory
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbsoluteCapability {
    pub location: Location,
    pub read_key: SymmetricKey,
}

impl AbsoluteCapability {
    pub fn new(location: Location, read_key: SymmetricKey) -> Self {
        Self { location, read_key }
    }

    pub fn owner(&self) -> &PublicKeyHash {
        &self.location.owner
    }

    pub fn writer(&self) -> &PublicKeyHash {
        &self.location.writer
    }

    pub fn map_key(&self) -> &MapKey {
        &self.location.map_key
    }

    /// Encode as a 162-byte sharing record
    pub fn to_record(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(READ_CAPABILITY_SIZE);
        out.push(MAP_HEADER_READ);
        self.put_common(&mut out);
        out
    }

    /// Decode a 162-byte sharing record
    pub fn from_record(bytes: &[u8]) -> Result<Self> {
        check_length(bytes, READ_CAPABILITY_SIZE)?;
        let mut reader = RecordReader::new(bytes);
        reader.expect_header(MAP_HEADER_READ)?;
        let capability = Self::read_common(&mut reader)?;
        reader.finish()?;
        Ok(capability)
    }

    fn put_common(&self, out: &mut Vec<u8>) {
        put_entry(out, KEY_OWNER, self.location.owner.as_bytes());
        put_entry(out, KEY_WRITER, self.location.writer.as_bytes());
        put_entry(out, KEY_MAP_KEY, self.location.map_key.as_bytes());
        put_entry(out, KEY_READ, self.read_key.as_bytes());
    }

    fn read_common(reader: &mut RecordReader<'_>) -> Result<Self> {
        let owner = PublicKeyHash::from_bytes(reader.entry(KEY_OWNER)?);
        let writer = PublicKeyHash::from_bytes(reader.entry(KEY_WRITER)?);
        let map_key = MapKey::from_bytes(reader.entry(KEY_MAP_KEY)?);
        let read_key = SymmetricKey::from_bytes(reader.entry(KEY_READ)?);
        Ok(Self::new(Location::new(owner, writer, map_key), read_key))
    }
}

/// Read and write access to one file or directory
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WritableAbsoluteCapability {
    pub capability: AbsoluteCapability,
    pub signer: SigningKeyPair,
}

impl WritableAbsoluteCapability {
    /// Fails if `signer` is not the writer of `location`
    pub fn new(location: Location, read_key: SymmetricKey, signer: SigningKeyPair) -> Result<Self> {
        if signer.public_hash() != location.writer {
            return Err(VaultError::InvalidCapability(format!(
                "signing key {} is not the writer {} of the location",
                signer.public_hash(),
                location.writer
            )));
        }
        Ok(Self {
            capability: AbsoluteCapability::new(location, read_key),
            signer,
        })
    }

    pub fn location(&self) -> &Location {
        &self.capability.location
    }

    pub fn read_only(&self) -> AbsoluteCapability {
        self.capability.clone()
    }

    /// Encode as a 201-byte sharing record
    pub fn to_record(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(WRITE_CAPABILITY_SIZE);
        out.push(MAP_HEADER_WRITE);
        self.capability.put_common(&mut out);
        put_entry(&mut out, KEY_WRITE, &self.signer.seed());
        out
    }

    /// Decode a 201-byte sharing record
    pub fn from_record(bytes: &[u8]) -> Result<Self> {
        check_length(bytes, WRITE_CAPABILITY_SIZE)?;
        let mut reader = RecordReader::new(bytes);
        reader.expect_header(MAP_HEADER_WRITE)?;
        let capability = AbsoluteCapability::read_common(&mut reader)?;
        let signer = SigningKeyPair::from_seed(&reader.entry(KEY_WRITE)?);
        reader.finish()?;
        Self::new(capability.location, capability.read_key, signer)
    }
}

/// Either kind of capability, as decoded from a sharing log
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Capability {
    Read(AbsoluteCapability),
    Write(WritableAbsoluteCapability),
}

impl Capability {
    pub fn absolute(&self) -> &AbsoluteCapability {
        match self {
            Capability::Read(cap) => cap,
            Capability::Write(cap) => &cap.capability,
        }
    }

    pub fn location(&self) -> &Location {
        &self.absolute().location
    }

    pub fn signer(&self) -> Option<&SigningKeyPair> {
        match self {
            Capability::Read(_) => None,
            Capability::Write(cap) => Some(&cap.signer),
        }
    }

    pub fn read_only(&self) -> AbsoluteCapability {
        self.absolute().clone()
    }

    pub fn to_record(&self) -> Vec<u8> {
        match self {
            Capability::Read(cap) => cap.to_record(),
            Capability::Write(cap) => cap.to_record(),
        }
    }

    /// Decode a record of the given kind
    pub fn from_record(kind: CapabilityKind, bytes: &[u8]) -> Result<Self> {
        match kind {
            CapabilityKind::Read => AbsoluteCapability::from_record(bytes).map(Capability::Read),
            CapabilityKind::Write => {
                WritableAbsoluteCapability::from_record(bytes).map(Capability::Write)
            }
        }
    }
}

impl From<AbsoluteCapability> for Capability {
    fn from(cap: AbsoluteCapability) -> Self {
        Capability::Read(cap)
    }
}

impl From<WritableAbsoluteCapability> for Capability {
    fn from(cap: WritableAbsoluteCapability) -> Self {
        Capability::Write(cap)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CapabilityKind {
    Read,
    Write,
}

/// Layout constants of one sharing log type
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordFormat {
    pub kind: CapabilityKind,
    /// Exact serialized size of every record
    pub record_size: usize,
    /// Name prefix of the numbered log files, e.g. `sharing.r.`
    pub file_prefix: &'static str,
    /// Suffix appended to the sharer's name for the cache file
    pub cache_suffix: &'static str,
}

impl RecordFormat {
    pub const READ: RecordFormat = RecordFormat {
        kind: CapabilityKind::Read,
        record_size: READ_CAPABILITY_SIZE,
        file_prefix: "sharing.r.",
        cache_suffix: ".r.",
    };

    pub const WRITE: RecordFormat = RecordFormat {
        kind: CapabilityKind::Write,
        record_size: WRITE_CAPABILITY_SIZE,
        file_prefix: "sharing.w.",
        cache_suffix: ".w.",
    };

    /// Byte size of a full log file
    pub fn file_max_size(&self, caps_per_file: u64) -> u64 {
        caps_per_file * self.record_size as u64
    }

    /// Name of log file `index`
    pub fn file_name(&self, index: u64) -> String {
        format!("{}{}", self.file_prefix, index)
    }

    /// Index of a log file, `None` if the name is not one of ours
    pub fn file_index(&self, name: &str) -> Option<u64> {
        name.strip_prefix(self.file_prefix)?.parse().ok()
    }

    /// Cache file name for records shared by `sharer`
    pub fn cache_file_name(&self, sharer: &str) -> String {
        format!("{}{}", sharer, self.cache_suffix)
    }

    /// Serialize a capability, rejecting anything that is not exactly one
    /// record of this format
    pub fn encode(&self, capability: &Capability) -> Result<Vec<u8>> {
        let bytes = capability.to_record();
        check_length(&bytes, self.record_size)?;
        Ok(bytes)
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Capability> {
        Capability::from_record(self.kind, bytes)
    }
}

fn check_length(bytes: &[u8], expected: usize) -> Result<()> {
    if bytes.len() != expected {
        return Err(VaultError::InvalidRecordLength {
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

fn put_entry(out: &mut Vec<u8>, key: &[u8], value: &[u8; KEY_SIZE]) {
    out.push(TEXT_MAJOR | key.len() as u8);
    out.extend_from_slice(key);
    out.push(BYTES_ONE_BYTE_LEN);
    out.push(VALUE_LEN);
    out.extend_from_slice(value);
}

struct RecordReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> RecordReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos + n;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or_else(|| VaultError::InvalidCapability("truncated record".to_string()))?;
        self.pos = end;
        Ok(slice)
    }

    fn expect_header(&mut self, header: u8) -> Result<()> {
        let found = self.take(1)?[0];
        if found != header {
            return Err(VaultError::InvalidCapability(format!(
                "expected map header {:#04x}, found {:#04x}",
                header, found
            )));
        }
        Ok(())
    }

    fn entry(&mut self, key: &[u8]) -> Result<[u8; 32]> {
        let expected_key_header = TEXT_MAJOR | key.len() as u8;
        let key_header = self.take(1)?[0];
        let found_key = self.take(key.len())?;
        if key_header != expected_key_header || found_key != key {
            return Err(VaultError::InvalidCapability(format!(
                "expected field {:?}",
                String::from_utf8_lossy(key)
            )));
        }
        let value_header = self.take(2)?;
        if value_header != [BYTES_ONE_BYTE_LEN, VALUE_LEN] {
            return Err(VaultError::InvalidCapability(format!(
                "field {:?} is not a 32-byte string",
                String::from_utf8_lossy(key)
            )));
        }
        let mut value = [0u8; 32];
        value.copy_from_slice(self.take(32)?);
        Ok(value)
    }

    fn finish(self) -> Result<()> {
        if self.pos != self.bytes.len() {
            return Err(VaultError::InvalidCapability(format!(
                "{} trailing bytes",
                self.bytes.len() - self.pos
            )));
        }
        Ok(())
    }
}
