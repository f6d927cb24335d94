//! Generic whole-file-JSON store for a single in-memory document per
//! subsystem (strategy weights, delegation suppression cache, prompt
//! variants, the reflector's learned-error map, ...).

use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;

use super::{StoreError, StoreResult};

/// Write `value` to `path` atomically: serialize to a sibling `.tmp` file,
/// `fsync`, then rename over the destination. Readers never observe a
/// partially written file.
pub async fn atomic_write_json<T: Serialize + Sync>(path: &Path, value: &T) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| StoreError::IoFailure {
                path: parent.display().to_string(),
                source,
            })?;
    }
    let tmp_path = path.with_extension("tmp");
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| StoreError::CorruptFormat {
        path: path.display().to_string(),
        source,
    })?;
    tokio::fs::write(&tmp_path, &bytes)
        .await
        .map_err(|source| StoreError::IoFailure {
            path: tmp_path.display().to_string(),
            source,
        })?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|source| StoreError::IoFailure {
            path: path.display().to_string(),
            source,
        })?;
    Ok(())
}

/// Read and parse `path`'s JSON contents. A missing file is treated as
/// "empty" per §4.3 and resolves to `T::default()`, not an error.
pub async fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> StoreResult<T> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| StoreError::CorruptFormat {
            path: path.display().to_string(),
            source,
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(source) => Err(StoreError::IoFailure {
            path: path.display().to_string(),
            source,
        }),
    }
}

/// A single JSON document, cached in memory and rewritten in full on every
/// save. Safe for concurrent use: all access goes through an internal
/// `RwLock`.
pub struct JsonFileStore<T> {
    path: PathBuf,
    cache: RwLock<T>,
    _marker: PhantomData<T>,
}

impl<T> JsonFileStore<T>
where
    T: Serialize + DeserializeOwned + Default + Clone + Sync + Send,
{
    /// Load `path` into memory (or start from `T::default()` if absent).
    pub async fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let initial = read_json_or_default(&path).await?;
        Ok(Self {
            path,
            cache: RwLock::new(initial),
            _marker: PhantomData,
        })
    }

    /// Return a clone of the current in-memory document.
    pub async fn get(&self) -> T {
        self.cache.read().await.clone()
    }

    /// Replace the document and persist it with a whole-file rewrite.
    pub async fn replace(&self, value: T) -> StoreResult<()> {
        atomic_write_json(&self.path, &value).await?;
        *self.cache.write().await = value;
        Ok(())
    }

    /// Mutate the in-memory document under lock, then persist the result.
    pub async fn mutate<F>(&self, f: F) -> StoreResult<()>
    where
        F: FnOnce(&mut T),
    {
        let mut guard = self.cache.write().await;
        f(&mut guard);
        atomic_write_json(&self.path, &*guard).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
    struct Doc {
        count: u32,
        tags: Vec<String>,
    }

    #[tokio::test]
    async fn open_on_missing_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let store: JsonFileStore<Doc> = JsonFileStore::open(dir.path().join("doc.json")).await.unwrap();
        assert_eq!(store.get().await, Doc::default());
    }

    #[tokio::test]
    async fn mutate_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        let store: JsonFileStore<Doc> = JsonFileStore::open(&path).await.unwrap();
        store
            .mutate(|doc| {
                doc.count = 3;
                doc.tags.push("x".into());
            })
            .await
            .unwrap();

        let reopened: JsonFileStore<Doc> = JsonFileStore::open(&path).await.unwrap();
        let doc = reopened.get().await;
        assert_eq!(doc.count, 3);
        assert_eq!(doc.tags, vec!["x".to_string()]);
    }

    #[tokio::test]
    async fn replace_overwrites_whole_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        let store: JsonFileStore<Doc> = JsonFileStore::open(&path).await.unwrap();
        store
            .replace(Doc {
                count: 9,
                tags: vec!["a".into()],
            })
            .await
            .unwrap();
        assert_eq!(store.get().await.count, 9);
    }

    #[tokio::test]
    async fn corrupt_file_surfaces_corrupt_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        tokio::fs::write(&path, b"not json").await.unwrap();
        let result: StoreResult<JsonFileStore<Doc>> = JsonFileStore::open(&path).await;
        assert!(matches!(result, Err(StoreError::CorruptFormat { .. })));
    }
}
