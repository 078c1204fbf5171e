//! Handoff payload files.

use std::path::Path;

use tracing::debug;

use crate::cache::MemoryStateStore;

use super::error::InfraError;

pub async fn read_payload(path: &Path) -> Result<MemoryStateStore, InfraError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|err| InfraError::io(path, err))?;
    let store = MemoryStateStore::from_payload(&raw).map_err(|err| InfraError::payload(path, err))?;
    debug!(path = %path.display(), keys = store.len(), "payload loaded");
    Ok(store)
}

pub async fn write_payload(path: &Path, store: &MemoryStateStore) -> Result<(), InfraError> {
    tokio::fs::write(path, store.to_payload())
        .await
        .map_err(|err| InfraError::io(path, err))?;
    debug!(path = %path.display(), keys = store.len(), "payload written");
    Ok(())
}
