//! Method hashing
//!
//! The hash of a method is the first 8 bytes (big-endian) of the SHA-256
//! digest of its name followed by its descriptor. It is computed the same way
//! by clients and containers and replaces the method name on the wire.

use sha2::{Digest, Sha256};

/// Compute the wire hash of a method from its name and descriptor
pub fn method_hash(name: &str, descriptor: &str) -> i64 {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(descriptor.as_bytes());
    let digest = hasher.finalize();

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(prefix)
}
