//! VaultFS Storage
//!
//! The block store as seen by the file layer:
//! - `NetworkAccess` trait for metadata blobs and content-addressed fragments
//! - `with_transaction` to scope writes to a storage transaction
//! - `MemoryNetwork` for testing

pub mod memory;
pub mod network;

pub use memory::MemoryNetwork;
pub use network::{with_transaction, NetworkAccess, NetworkStats, TransactionId};
