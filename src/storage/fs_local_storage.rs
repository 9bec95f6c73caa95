use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::{create_dir_all, metadata, read_dir, remove_dir_all, remove_file, rename, try_exists, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{error, trace, warn};
use uuid::Uuid;

use crate::storage::item::{FileContentLocator, ItemAttributes, LocalEntry, LocalEntryKind};
use crate::storage::local_storage::LocalStorage;
use crate::util::item_path;

/// Local storage in the file system. Below the root directory, `content/` mirrors the item tree,
///  `attributes/` holds a JSON sidecar per file, and `tmp/` is the staging area for writes and
///  deletes, which are completed by a rename.
#[derive(Debug)]
pub struct FsLocalStorage {
    root: PathBuf,
}
impl FsLocalStorage {
    pub async fn new(root: impl Into<PathBuf>) -> anyhow::Result<FsLocalStorage> {
        let root = root.into();
        for dir in ["content", "attributes", "tmp"] {
            create_dir_all(root.join(dir)).await?;
        }
        Ok(FsLocalStorage { root })
    }

    fn relative(path: &str) -> anyhow::Result<PathBuf> {
        let mut result = PathBuf::new();
        for segment in item_path::segments(path) {
            if segment == ".." {
                return Err(anyhow!("invalid item path {:?}", path));
            }
            result.push(segment);
        }
        Ok(result)
    }

    fn content_path(&self, path: &str) -> anyhow::Result<PathBuf> {
        Ok(self.root.join("content").join(Self::relative(path)?))
    }

    fn attributes_path(&self, path: &str) -> anyhow::Result<PathBuf> {
        let mut result = self.root.join("attributes").join(Self::relative(path)?);
        let file_name = format!("{}.json", item_path::name(path));
        result.set_file_name(file_name);
        Ok(result)
    }

    fn temp_path(&self, suffix: &str) -> PathBuf {
        self.root.join("tmp").join(format!("{}.{}", Uuid::new_v4().as_hyphenated(), suffix))
    }

    async fn write_atomically(&self, target: &Path, data: &[u8]) -> anyhow::Result<()> {
        if let Some(parent) = target.parent() {
            create_dir_all(parent).await?;
        }

        let temp_path = self.temp_path("inserting");
        let result = async {
            let mut file = OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&temp_path)
                .await?;
            file.write_all(data).await?;
            file.flush().await?;
            rename(&temp_path, target).await?;
            Ok::<_, anyhow::Error>(())
        }.await;

        if result.is_err() && try_exists(&temp_path).await.unwrap_or(false) {
            if let Err(e) = remove_file(&temp_path).await {
                error!("error cleaning up {} after failed write: {}", temp_path.display(), e);
            }
        }
        result
    }

    async fn read_attributes(&self, path: &str) -> anyhow::Result<ItemAttributes> {
        let attributes_path = self.attributes_path(path)?;
        if !try_exists(&attributes_path).await? {
            return Ok(ItemAttributes::default());
        }

        let mut json = String::new();
        OpenOptions::new()
            .read(true)
            .open(&attributes_path)
            .await?
            .read_to_string(&mut json)
            .await?;

        match serde_json::from_str(&json) {
            Ok(attributes) => Ok(attributes),
            Err(e) => {
                warn!("ignoring corrupt attributes for {}: {}", path, e);
                Ok(ItemAttributes::default())
            }
        }
    }

    async fn entry(&self, path: &str, content_path: PathBuf) -> anyhow::Result<Option<LocalEntry>> {
        let meta = match metadata(&content_path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if meta.is_dir() {
            return Ok(Some(LocalEntry {
                path: path.to_string(),
                kind: LocalEntryKind::Collection,
                attributes: ItemAttributes::default(),
            }));
        }

        Ok(Some(LocalEntry {
            path: path.to_string(),
            kind: LocalEntryKind::File {
                length: meta.len(),
                locator: Arc::new(FileContentLocator::new(content_path)),
            },
            attributes: self.read_attributes(path).await?,
        }))
    }

    /// rename first so that concurrent readers see either everything or nothing
    async fn remove_tree(&self, target: &Path) -> anyhow::Result<()> {
        let temp_path = self.temp_path("deleting");
        rename(target, &temp_path).await?;
        remove_dir_all(&temp_path).await?;
        Ok(())
    }
}

#[async_trait]
impl LocalStorage for FsLocalStorage {
    async fn retrieve(&self, path: &str) -> anyhow::Result<Option<LocalEntry>> {
        let path = item_path::normalize(path);
        let content_path = self.content_path(&path)?;
        trace!("retrieving {} from {}", path, content_path.display());
        self.entry(&path, content_path).await
    }

    async fn list(&self, path: &str) -> anyhow::Result<Option<Vec<LocalEntry>>> {
        let path = item_path::normalize(path);
        let content_path = self.content_path(&path)?;

        match metadata(&content_path).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let mut names = Vec::new();
        let mut dir = read_dir(&content_path).await?;
        while let Some(dir_entry) = dir.next_entry().await? {
            match dir_entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(name) => warn!("skipping non UTF-8 file name {:?} in {}", name, content_path.display()),
            }
        }
        names.sort();

        let mut result = Vec::with_capacity(names.len());
        for name in names {
            let child_path = item_path::join(&path, &name);
            if let Some(entry) = self.entry(&child_path, content_path.join(&name)).await? {
                result.push(entry);
            }
        }
        Ok(Some(result))
    }

    async fn store(&self, path: &str, data: Bytes, attributes: ItemAttributes) -> anyhow::Result<()> {
        let path = item_path::normalize(path);
        if path == item_path::ROOT {
            return Err(anyhow!("cannot store a file at the root"));
        }

        let content_path = self.content_path(&path)?;
        trace!("storing {} bytes at {}", data.len(), content_path.display());

        if let Ok(meta) = metadata(&content_path).await {
            if meta.is_dir() {
                return Err(anyhow!("{} is a collection", path));
            }
        }

        self.write_atomically(&self.attributes_path(&path)?, serde_json::to_string(&attributes)?.as_bytes()).await?;
        self.write_atomically(&content_path, &data).await
    }

    async fn update_attributes(&self, path: &str, attributes: ItemAttributes) -> anyhow::Result<bool> {
        let path = item_path::normalize(path);
        match metadata(self.content_path(&path)?).await {
            Ok(meta) if meta.is_file() => {
                self.write_atomically(&self.attributes_path(&path)?, serde_json::to_string(&attributes)?.as_bytes()).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, path: &str) -> anyhow::Result<bool> {
        let path = item_path::normalize(path);
        let content_path = self.content_path(&path)?;
        trace!("deleting {} from {}", path, content_path.display());

        let meta = match metadata(&content_path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        if meta.is_dir() {
            if path == item_path::ROOT {
                return Err(anyhow!("refusing to delete the storage root"));
            }
            self.remove_tree(&content_path).await?;

            let attributes_dir = self.root.join("attributes").join(Self::relative(&path)?);
            if try_exists(&attributes_dir).await? {
                self.remove_tree(&attributes_dir).await?;
            }
        }
        else {
            remove_file(&content_path).await?;
            let attributes_path = self.attributes_path(&path)?;
            if try_exists(&attributes_path).await? {
                remove_file(&attributes_path).await?;
            }
        }
        Ok(true)
    }
}
