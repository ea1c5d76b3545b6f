use std::{marker::PhantomData, sync::Arc};

use serde::{Deserialize, Serialize};

use super::{Repository, VersionedRepository};
use crate::{
    domain::{Entity, VersionId, Versioned},
    store::{BoxFuture, EntityStore, StoreError, StoreId, decode_segment, encode_segment},
};

pub const LEGACY_FORMAT: &str = "legacy/v1";

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    format: &'a str,
    kind: &'a str,
    payload: &'a T,
}

#[derive(Deserialize)]
struct Envelope<T> {
    format: String,
    kind: String,
    payload: T,
}

/// Repository over the legacy flat entity store.
///
/// ```text
/// <prefix>:<id>              current record
/// <prefix>:<id>:<version>    history
/// ```
/// Records are wrapped in a `{format, kind, payload}` envelope.
pub struct LegacyRepository<T> {
    store: Arc<dyn EntityStore>,
    max_versions: Option<usize>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> LegacyRepository<T> {
    pub fn new(store: Arc<dyn EntityStore>, max_versions: Option<usize>) -> Self {
        Self {
            store,
            max_versions,
            _entity: PhantomData,
        }
    }

    fn prefix() -> String {
        format!("{}:", T::KIND.legacy_prefix())
    }

    fn current_key(id: &str) -> String {
        format!("{}{}", Self::prefix(), encode_segment(id))
    }

    fn version_key(id: &str, version: VersionId) -> String {
        format!("{}:{}", Self::current_key(id), version.key())
    }

    fn encode(entity: &T) -> Result<Vec<u8>, StoreError> {
        Ok(serde_json::to_vec(&EnvelopeRef {
            format: LEGACY_FORMAT,
            kind: T::KIND.legacy_prefix(),
            payload: entity,
        })?)
    }

    fn decode(key: &str, bytes: &[u8]) -> Result<T, StoreError> {
        let corrupt = |reason: String| StoreError::Corrupt {
            key: key.to_string(),
            reason,
        };
        let envelope: Envelope<T> =
            serde_json::from_slice(bytes).map_err(|e| corrupt(e.to_string()))?;
        if envelope.format != LEGACY_FORMAT {
            return Err(corrupt(format!("unsupported format {:?}", envelope.format)));
        }
        if envelope.kind != T::KIND.legacy_prefix() {
            return Err(corrupt(format!(
                "expected kind {:?}, found {:?}",
                T::KIND.legacy_prefix(),
                envelope.kind
            )));
        }
        Ok(envelope.payload)
    }

    async fn fetch(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.store.fetch(key).await? {
            Some(bytes) => Self::decode(key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    async fn list_versions(&self, id: &str) -> Result<Vec<VersionId>, StoreError> {
        let prefix = format!("{}:", Self::current_key(id));
        let mut versions = Vec::new();
        for name in self.store.names().await? {
            let Some(rest) = name.strip_prefix(&prefix) else {
                continue;
            };
            let version = VersionId::parse_key(rest).ok_or_else(|| StoreError::Corrupt {
                key: name.clone(),
                reason: "history entry is not a version".to_string(),
            })?;
            versions.push(version);
        }
        versions.sort();
        Ok(versions)
    }

    async fn evict_history(&self, id: &str, keep: Option<VersionId>) -> Result<(), StoreError> {
        let Some(max_versions) = self.max_versions else {
            return Ok(());
        };
        let versions = self.list_versions(id).await?;
        if versions.len() <= max_versions {
            return Ok(());
        }
        let excess = versions.len() - max_versions;
        for version in versions
            .into_iter()
            .filter(|v| Some(*v) != keep)
            .take(excess)
        {
            self.store.expunge(&Self::version_key(id, version)).await?;
        }
        Ok(())
    }
}

impl<T: Entity> Repository<T> for LegacyRepository<T> {
    fn store_id(&self) -> &StoreId {
        self.store.id()
    }

    fn get<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<T>, StoreError>> {
        Box::pin(async move { self.fetch(&Self::current_key(id)).await })
    }

    fn ids(&self) -> BoxFuture<'_, Result<Vec<String>, StoreError>> {
        Box::pin(async move {
            let prefix = Self::prefix();
            let mut ids = Vec::new();
            for name in self.store.names().await? {
                let Some(rest) = name.strip_prefix(&prefix) else {
                    continue;
                };
                // History keys carry a second `:`; encoded ids never contain one.
                if rest.contains(':') {
                    continue;
                }
                ids.push(decode_segment(rest)?);
            }
            Ok(ids)
        })
    }

    fn store(&self, entity: T) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let id = entity.entity_id();
            let bytes = Self::encode(&entity)?;
            if let Some(version) = entity.entity_version() {
                self.store
                    .store(&Self::version_key(&id, version), bytes.clone())
                    .await?;
            }
            self.store.store(&Self::current_key(&id), bytes).await?;
            if entity.entity_version().is_some() {
                self.evict_history(&id, entity.entity_version()).await?;
            }
            Ok(())
        })
    }

    fn delete<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<bool, StoreError>> {
        Box::pin(async move {
            let mut deleted = false;
            for version in self.list_versions(id).await? {
                deleted |= self.store.expunge(&Self::version_key(id, version)).await?;
            }
            deleted |= self.store.expunge(&Self::current_key(id)).await?;
            Ok(deleted)
        })
    }
}

impl<T: Versioned> VersionedRepository<T> for LegacyRepository<T> {
    fn versions<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Vec<VersionId>, StoreError>> {
        Box::pin(self.list_versions(id))
    }

    fn get_version<'a>(
        &'a self,
        id: &'a str,
        version: VersionId,
    ) -> BoxFuture<'a, Result<Option<T>, StoreError>> {
        Box::pin(async move { self.fetch(&Self::version_key(id, version)).await })
    }

    fn store_version(&self, entity: T) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let id = entity.entity_id();
            let key = Self::version_key(&id, entity.version());
            self.store.store(&key, Self::encode(&entity)?).await?;
            let current = self.get(&id).await?.map(|c| c.version());
            self.evict_history(&id, current).await
        })
    }

    fn store_referenced_version(&self, entity: T) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let key = Self::version_key(&entity.entity_id(), entity.version());
            self.store.store(&key, Self::encode(&entity)?).await
        })
    }
}
