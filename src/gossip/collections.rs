//! Collection type aliases shared across the crate.
//!
//! Swaps the standard library's `RandomState` hasher for `twox-hash`,
//! matching the teacher's `collections_randomstate_twox_hash` default
//! feature: UIDs are small dense integers, and a non-cryptographic
//! hash is both faster and sufficient here (there are no adversarial
//! HashDoS concerns on a fixed, operator-controlled node fleet).

#[cfg(feature = "collections_randomstate_twox_hash")]
pub type HashMap<K, V> = std::collections::HashMap<K, V, twox_hash::RandomXxHashBuilder64>;

#[cfg(not(feature = "collections_randomstate_twox_hash"))]
pub type HashMap<K, V> = std::collections::HashMap<K, V>;

/// Constructs an empty `HashMap` with the configured hasher.
pub fn hash_map<K, V>() -> HashMap<K, V> {
    HashMap::default()
}
