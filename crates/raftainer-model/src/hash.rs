//! Deterministic content hash of a container spec.
//!
//! The spec is converted to a `serde_json::Value` first; its object maps
//! are ordered by key, so the serialized form is canonical regardless of
//! field declaration order or input document layout.

use sha2::{Digest, Sha256};

use crate::pod::Container;

/// Hex-encoded SHA-256 of the container's canonical JSON form.
pub fn config_hash(container: &Container) -> String {
    let canonical = serde_json::to_value(container)
        .and_then(|value| serde_json::to_vec(&value))
        .unwrap_or_default();
    hex::encode(Sha256::digest(&canonical))
}
