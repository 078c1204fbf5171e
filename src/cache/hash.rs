use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 digest of `data`.
pub fn hash(data: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_ref());
    hex::encode(hasher.finalize())
}

/// Store key of the snapshot bound to `fingerprint` at sequence `id`.
pub fn snapshot_key(fingerprint: &str, id: u64) -> String {
    hash(format!("{fingerprint}_{id}"))
}
