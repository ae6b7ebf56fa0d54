//! BLAKE3 hashing utilities for Anchorage
//!
//! Every hash in the anchor subsystem is BLAKE3 with 256-bit output. Team
//! ordering and signed messages use domain-separated hashes so that a
//! signature over one kind of message can never be replayed as another.

/// Hash data using BLAKE3 (256-bit output)
pub fn hash_blake3(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Hash multiple items together
pub fn hash_concat(items: &[&[u8]]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    for item in items {
        hasher.update(item);
    }
    *hasher.finalize().as_bytes()
}

/// Hash items under a domain tag
///
/// The tag is length-prefixed so `("ab", "c")` and `("a", "bc")` never collide.
pub fn hash_tagged(tag: &str, items: &[&[u8]]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&(tag.len() as u32).to_le_bytes());
    hasher.update(tag.as_bytes());
    for item in items {
        hasher.update(item);
    }
    *hasher.finalize().as_bytes()
}

/// Derive key material from a seed
pub fn derive_key(context: &str, key_material: &[u8]) -> [u8; 32] {
    blake3::derive_key(context, key_material)
}
