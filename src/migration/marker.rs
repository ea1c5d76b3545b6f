use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::store::{NodePath, StoreError, StoreHandle};

/// Marker location in node-tree stores: `/migration/storage-version`.
pub const MARKER_NODE: [&str; 2] = ["migration", "storage-version"];

/// Marker key in legacy flat stores.
pub const LEGACY_MARKER_KEY: &str = "internal:storage-version";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageVersion(pub u32);

impl StorageVersion {
    pub const ZERO: Self = Self(0);
}

impl std::fmt::Display for StorageVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Highest completed migration step of one store instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMarker {
    pub version: StorageVersion,
    /// RFC 3339.
    pub updated_at: String,
}

impl VersionMarker {
    pub fn now(version: StorageVersion) -> Self {
        Self {
            version,
            updated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

fn marker_path() -> Result<NodePath, StoreError> {
    NodePath::new(MARKER_NODE)
}

fn decode(key: String, bytes: &[u8]) -> Result<VersionMarker, StoreError> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Corrupt {
        key,
        reason: e.to_string(),
    })
}

pub async fn read_marker(store: &StoreHandle) -> Result<Option<VersionMarker>, StoreError> {
    match store {
        StoreHandle::Persistent(store) => {
            let path = marker_path()?;
            match store.read(&path).await? {
                Some(bytes) => decode(path.to_string(), &bytes).map(Some),
                None => Ok(None),
            }
        }
        StoreHandle::Legacy(store) => match store.fetch(LEGACY_MARKER_KEY).await? {
            Some(bytes) => decode(LEGACY_MARKER_KEY.to_string(), &bytes).map(Some),
            None => Ok(None),
        },
    }
}

pub async fn write_marker(store: &StoreHandle, version: StorageVersion) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec(&VersionMarker::now(version))?;
    match store {
        StoreHandle::Persistent(store) => store.write(&marker_path()?, bytes).await,
        StoreHandle::Legacy(store) => store.store(LEGACY_MARKER_KEY, bytes).await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::store::{EntityStore, InMemoryStore, MemoryEntityStore, PersistenceStore};

    #[tokio::test]
    async fn marker_lives_at_fixed_locations() {
        let nodes = Arc::new(InMemoryStore::new());
        let handle = StoreHandle::Persistent(nodes.clone());
        assert_eq!(read_marker(&handle).await.unwrap(), None);
        write_marker(&handle, StorageVersion(3)).await.unwrap();
        assert_eq!(
            read_marker(&handle).await.unwrap().map(|m| m.version),
            Some(StorageVersion(3))
        );
        assert!(
            nodes
                .snapshot()
                .await
                .contains_key("/migration/storage-version")
        );

        let flat = Arc::new(MemoryEntityStore::new());
        let handle = StoreHandle::Legacy(flat.clone());
        write_marker(&handle, StorageVersion(1)).await.unwrap();
        let raw = flat.fetch(LEGACY_MARKER_KEY).await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(value["version"], 1);
        assert!(value["updated_at"].is_string());
    }

    #[tokio::test]
    async fn garbage_marker_is_corrupt() {
        let nodes = Arc::new(InMemoryStore::new());
        nodes
            .write(&NodePath::new(MARKER_NODE).unwrap(), b"{".to_vec())
            .await
            .unwrap();
        let err = read_marker(&StoreHandle::Persistent(nodes)).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }
}
