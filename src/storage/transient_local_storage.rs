use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use tracing::trace;

use crate::storage::item::{BytesContentLocator, ItemAttributes, LocalEntry, LocalEntryKind};
use crate::storage::local_storage::LocalStorage;
use crate::util::item_path;

/// in-memory local storage, neither optimized nor particularly robust - for tests and
///  ephemeral repositories
#[derive(Debug, Default)]
pub struct TransientLocalStorage {
    files: RwLock<BTreeMap<String, (Bytes, ItemAttributes)>>,
}
impl TransientLocalStorage {
    pub fn new() -> TransientLocalStorage {
        Default::default()
    }

    fn file_entry(path: &str, data: &Bytes, attributes: &ItemAttributes) -> LocalEntry {
        LocalEntry {
            path: path.to_string(),
            kind: LocalEntryKind::File {
                length: data.len() as u64,
                locator: Arc::new(BytesContentLocator::new(data.clone())),
            },
            attributes: attributes.clone(),
        }
    }

    fn collection_entry(path: &str) -> LocalEntry {
        LocalEntry {
            path: path.to_string(),
            kind: LocalEntryKind::Collection,
            attributes: ItemAttributes::default(),
        }
    }

    fn lock_err<T>(_: T) -> anyhow::Error {
        anyhow!("transient storage lock poisoned")
    }
}

#[async_trait]
impl LocalStorage for TransientLocalStorage {
    async fn retrieve(&self, path: &str) -> anyhow::Result<Option<LocalEntry>> {
        let path = item_path::normalize(path);
        let files = self.files.read().map_err(Self::lock_err)?;

        if let Some((data, attributes)) = files.get(&path) {
            return Ok(Some(Self::file_entry(&path, data, attributes)));
        }

        let is_collection = path == item_path::ROOT
            || files.keys().any(|p| p != &path && item_path::is_below(p, &path));
        Ok(is_collection.then(|| Self::collection_entry(&path)))
    }

    async fn list(&self, path: &str) -> anyhow::Result<Option<Vec<LocalEntry>>> {
        let path = item_path::normalize(path);
        let files = self.files.read().map_err(Self::lock_err)?;

        if files.contains_key(&path) {
            return Ok(None);
        }

        let mut children: BTreeMap<String, LocalEntry> = BTreeMap::new();
        for (file_path, (data, attributes)) in files.iter() {
            let Some(rest) = item_path::strip_prefix(file_path, &path) else { continue };
            let Some(child_name) = item_path::segments(&rest).next() else { continue };
            let child_path = item_path::join(&path, child_name);

            if child_path == *file_path {
                children.insert(child_path.clone(), Self::file_entry(&child_path, data, attributes));
            }
            else {
                children.entry(child_path.clone())
                    .or_insert_with(|| Self::collection_entry(&child_path));
            }
        }

        if children.is_empty() && path != item_path::ROOT {
            return Ok(None);
        }
        Ok(Some(children.into_values().collect()))
    }

    async fn store(&self, path: &str, data: Bytes, attributes: ItemAttributes) -> anyhow::Result<()> {
        let path = item_path::normalize(path);
        if path == item_path::ROOT {
            return Err(anyhow!("cannot store a file at the root"));
        }
        trace!("storing {} bytes at {}", data.len(), path);

        let mut files = self.files.write().map_err(Self::lock_err)?;
        if files.keys().any(|p| p != &path && item_path::is_below(p, &path)) {
            return Err(anyhow!("{} is a collection", path));
        }
        if let Some(ancestor) = files.keys().find(|p| item_path::is_below(&path, p) && **p != path) {
            return Err(anyhow!("{} is a file, cannot store {} below it", ancestor, path));
        }
        files.insert(path, (data, attributes));
        Ok(())
    }

    async fn update_attributes(&self, path: &str, attributes: ItemAttributes) -> anyhow::Result<bool> {
        let path = item_path::normalize(path);
        let mut files = self.files.write().map_err(Self::lock_err)?;
        match files.get_mut(&path) {
            Some(entry) => {
                entry.1 = attributes;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, path: &str) -> anyhow::Result<bool> {
        let path = item_path::normalize(path);
        trace!("deleting {}", path);

        let mut files = self.files.write().map_err(Self::lock_err)?;
        let before = files.len();
        files.retain(|p, _| !item_path::is_below(p, &path));
        Ok(files.len() != before)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    async fn storage_with(paths: &[&str]) -> TransientLocalStorage {
        let storage = TransientLocalStorage::new();
        for p in paths {
            storage.store(p, Bytes::from(p.to_string()), ItemAttributes::default()).await.unwrap();
        }
        storage
    }

    #[tokio::test]
    async fn test_retrieve_file_and_collection() {
        let storage = storage_with(&["/a/b/c.jar"]).await;

        let file = storage.retrieve("a/b/c.jar").await.unwrap().unwrap();
        assert!(!file.is_collection());
        assert!(storage.retrieve("/a/b").await.unwrap().unwrap().is_collection());
        assert!(storage.retrieve("/").await.unwrap().unwrap().is_collection());
        assert!(storage.retrieve("/a/x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_direct_children() {
        let storage = storage_with(&["/a/b/c.jar", "/a/b/d/e.pom", "/a/f.txt"]).await;

        let children = storage.list("/a/b").await.unwrap().unwrap();
        let paths: Vec<_> = children.iter().map(|e| (e.path.as_str(), e.is_collection())).collect();
        assert_eq!(paths, vec![("/a/b/c.jar", false), ("/a/b/d", true)]);

        assert!(storage.list("/a/f.txt").await.unwrap().is_none());
        assert!(storage.list("/nothing").await.unwrap().is_none());
        assert_eq!(TransientLocalStorage::new().list("/").await.unwrap().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_store_conflicts() {
        let storage = storage_with(&["/a/b.jar"]).await;
        assert!(storage.store("/a", Bytes::new(), ItemAttributes::default()).await.is_err());
        assert!(storage.store("/a/b.jar/c", Bytes::new(), ItemAttributes::default()).await.is_err());
        assert!(storage.store("/a/b.jar", Bytes::from_static(b"new"), ItemAttributes::default()).await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_recursive() {
        let storage = storage_with(&["/a/b/c.jar", "/a/b/d.jar", "/a/e.jar"]).await;
        assert!(storage.delete("/a/b").await.unwrap());
        assert!(storage.retrieve("/a/b/c.jar").await.unwrap().is_none());
        assert!(storage.retrieve("/a/e.jar").await.unwrap().is_some());
        assert!(!storage.delete("/a/b").await.unwrap());
    }

    #[tokio::test]
    async fn test_update_attributes() {
        let storage = storage_with(&["/a.jar"]).await;
        let attributes = ItemAttributes { last_check_millis: 42, ..ItemAttributes::default() };
        assert!(storage.update_attributes("/a.jar", attributes).await.unwrap());
        assert_eq!(storage.retrieve("/a.jar").await.unwrap().unwrap().attributes.last_check_millis, 42);
        assert!(!storage.update_attributes("/b.jar", ItemAttributes::default()).await.unwrap());
    }
}
