use std::collections::BTreeMap;
use std::fmt::{Debug, Display, Formatter};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use tokio::fs::OpenOptions;
use tokio::sync::Mutex;
use tokio_util::io::ReaderStream;

use crate::util::item_path;

pub type BlobStream = Pin<Box<dyn Stream<Item = anyhow::Result<Bytes>> + Send + 'static>>;

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// `(repository, path)`: a single logical location
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepositoryItemUid {
    pub repository_id: String,
    pub path: String,
}

impl RepositoryItemUid {
    pub fn new(repository_id: &str, path: &str) -> RepositoryItemUid {
        RepositoryItemUid {
            repository_id: repository_id.to_string(),
            path: item_path::normalize(path),
        }
    }
}

impl Display for RepositoryItemUid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.repository_id, self.path)
    }
}

/// Persistent per-item bookkeeping, stored next to the content
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemAttributes {
    #[serde(default)]
    pub created_millis: u64,
    /// when the content was last fetched or confirmed from its remote
    #[serde(default)]
    pub last_check_millis: u64,
    /// set by cache expiry: the next request re-checks the remote
    #[serde(default)]
    pub expired: bool,
    #[serde(default)]
    pub remote_url: Option<String>,
    #[serde(default)]
    pub sha1: Option<String>,
    #[serde(default)]
    pub md5: Option<String>,
    #[serde(default)]
    pub content_generator_id: Option<String>,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl ItemAttributes {
    pub fn checked_now() -> ItemAttributes {
        let now = now_millis();
        ItemAttributes {
            created_millis: now,
            last_check_millis: now,
            ..ItemAttributes::default()
        }
    }
}

#[async_trait]
pub trait ContentLocator: Debug + Send + Sync {
    /// false means `content()` may be called only once
    fn is_reusable(&self) -> bool;

    async fn content(&self) -> anyhow::Result<BlobStream>;
}

pub async fn read_all(mut stream: BlobStream) -> anyhow::Result<Bytes> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.freeze())
}

#[derive(Debug, Clone)]
pub struct BytesContentLocator {
    data: Bytes,
}
impl BytesContentLocator {
    pub fn new(data: Bytes) -> BytesContentLocator {
        BytesContentLocator { data }
    }
}

#[async_trait]
impl ContentLocator for BytesContentLocator {
    fn is_reusable(&self) -> bool {
        true
    }

    async fn content(&self) -> anyhow::Result<BlobStream> {
        let data = self.data.clone();
        Ok(Box::pin(futures::stream::once(async move { Ok::<_, anyhow::Error>(data) })))
    }
}

#[derive(Debug, Clone)]
pub struct FileContentLocator {
    file: PathBuf,
}
impl FileContentLocator {
    pub fn new(file: PathBuf) -> FileContentLocator {
        FileContentLocator { file }
    }
}

#[async_trait]
impl ContentLocator for FileContentLocator {
    fn is_reusable(&self) -> bool {
        true
    }

    async fn content(&self) -> anyhow::Result<BlobStream> {
        let file = OpenOptions::new()
            .read(true)
            .open(&self.file)
            .await?;
        Ok(Box::pin(ReaderStream::new(file).map(|chunk| chunk.map_err(anyhow::Error::from))))
    }
}

/// Wraps a stream that can be consumed exactly once, e.g. a response body in transit
pub struct PreparedContentLocator {
    stream: Mutex<Option<BlobStream>>,
    consumed: AtomicBool,
}
impl PreparedContentLocator {
    pub fn new(stream: BlobStream) -> PreparedContentLocator {
        PreparedContentLocator {
            stream: Mutex::new(Some(stream)),
            consumed: AtomicBool::new(false),
        }
    }
}
impl Debug for PreparedContentLocator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedContentLocator")
            .field("consumed", &self.consumed.load(Ordering::Acquire))
            .finish()
    }
}

#[async_trait]
impl ContentLocator for PreparedContentLocator {
    fn is_reusable(&self) -> bool {
        false
    }

    async fn content(&self) -> anyhow::Result<BlobStream> {
        self.consumed.store(true, Ordering::Release);
        self.stream.lock().await
            .take()
            .ok_or_else(|| anyhow!("the content of this item was already consumed"))
    }
}

#[derive(Debug, Clone)]
pub struct FileItem {
    pub uid: RepositoryItemUid,
    pub length: u64,
    pub mime_type: String,
    pub locator: Arc<dyn ContentLocator>,
    pub attributes: ItemAttributes,
}

impl FileItem {
    pub fn new(uid: RepositoryItemUid, length: u64, locator: Arc<dyn ContentLocator>, attributes: ItemAttributes) -> FileItem {
        let mime_type = mime_guess::from_path(&uid.path)
            .first_or_octet_stream()
            .to_string();
        FileItem {
            uid,
            length,
            mime_type,
            locator,
            attributes,
        }
    }

    pub fn content_generator_id(&self) -> Option<&str> {
        self.attributes.content_generator_id.as_deref()
    }

    pub async fn read_content(&self) -> anyhow::Result<Bytes> {
        read_all(self.locator.content().await?).await
    }
}

/// A directory. Children are not materialized; `list` them through the owning repository.
#[derive(Debug, Clone)]
pub struct CollectionItem {
    pub uid: RepositoryItemUid,
    pub attributes: ItemAttributes,
}

/// Produced fresh per request by the owning repository
#[derive(Debug, Clone)]
pub enum StorageItem {
    File(FileItem),
    Collection(CollectionItem),
}

impl StorageItem {
    pub fn uid(&self) -> &RepositoryItemUid {
        match self {
            StorageItem::File(f) => &f.uid,
            StorageItem::Collection(c) => &c.uid,
        }
    }

    pub fn path(&self) -> &str {
        &self.uid().path
    }

    pub fn name(&self) -> &str {
        item_path::name(self.path())
    }

    pub fn repository_id(&self) -> &str {
        &self.uid().repository_id
    }

    pub fn attributes(&self) -> &ItemAttributes {
        match self {
            StorageItem::File(f) => &f.attributes,
            StorageItem::Collection(c) => &c.attributes,
        }
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, StorageItem::Collection(_))
    }

    pub fn as_file(&self) -> Option<&FileItem> {
        match self {
            StorageItem::File(f) => Some(f),
            StorageItem::Collection(_) => None,
        }
    }

    /// the same item presented under another identity, e.g. a member's item served by a group
    pub fn with_uid(self, uid: RepositoryItemUid) -> StorageItem {
        match self {
            StorageItem::File(f) => StorageItem::File(FileItem { uid, ..f }),
            StorageItem::Collection(c) => StorageItem::Collection(CollectionItem { uid, ..c }),
        }
    }

    pub fn collection(uid: RepositoryItemUid) -> StorageItem {
        StorageItem::Collection(CollectionItem { uid, attributes: ItemAttributes::default() })
    }

    pub fn from_local(repository_id: &str, entry: LocalEntry) -> StorageItem {
        let uid = RepositoryItemUid::new(repository_id, &entry.path);
        match entry.kind {
            LocalEntryKind::File { length, locator } => StorageItem::File(FileItem::new(uid, length, locator, entry.attributes)),
            LocalEntryKind::Collection => StorageItem::Collection(CollectionItem { uid, attributes: entry.attributes }),
        }
    }
}

/// What a local storage holds at a path
#[derive(Debug, Clone)]
pub struct LocalEntry {
    pub path: String,
    pub kind: LocalEntryKind,
    pub attributes: ItemAttributes,
}

#[derive(Debug, Clone)]
pub enum LocalEntryKind {
    File { length: u64, locator: Arc<dyn ContentLocator> },
    Collection,
}

impl LocalEntry {
    pub fn is_collection(&self) -> bool {
        matches!(self.kind, LocalEntryKind::Collection)
    }
}

/// Replaces the content of file items that name it, e.g. to render a document on the fly
#[async_trait]
pub trait ContentGenerator: Debug + Send + Sync {
    fn id(&self) -> &str;

    async fn generate(&self, item: &FileItem) -> anyhow::Result<Arc<dyn ContentLocator>>;
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_bytes_locator_is_reusable() {
        let locator = BytesContentLocator::new(Bytes::from_static(b"abc"));
        assert!(locator.is_reusable());
        assert_eq!(read_all(locator.content().await.unwrap()).await.unwrap(), Bytes::from_static(b"abc"));
        assert_eq!(read_all(locator.content().await.unwrap()).await.unwrap(), Bytes::from_static(b"abc"));
    }

    #[tokio::test]
    async fn test_prepared_locator_is_one_shot() {
        let stream: BlobStream = Box::pin(futures::stream::iter(vec![
            Ok(Bytes::from_static(b"ab")),
            Ok(Bytes::from_static(b"c")),
        ]));
        let locator = PreparedContentLocator::new(stream);
        assert!(!locator.is_reusable());
        assert_eq!(read_all(locator.content().await.unwrap()).await.unwrap(), Bytes::from_static(b"abc"));
        assert!(locator.content().await.is_err());
    }

    #[test]
    fn test_rewrap_keeps_content() {
        let item = StorageItem::File(FileItem::new(
            RepositoryItemUid::new("member", "/org/x/a.jar"),
            3,
            Arc::new(BytesContentLocator::new(Bytes::from_static(b"abc"))),
            ItemAttributes::default(),
        ));
        assert_eq!(item.as_file().unwrap().mime_type, "application/java-archive");

        let rewrapped = item.with_uid(RepositoryItemUid::new("group", "org/x/a.jar"));
        assert_eq!(rewrapped.repository_id(), "group");
        assert_eq!(rewrapped.path(), "/org/x/a.jar");
        assert_eq!(rewrapped.as_file().unwrap().length, 3);
    }

    #[test]
    fn test_uid_display() {
        assert_eq!(RepositoryItemUid::new("central", "org//x/").to_string(), "central:/org/x");
    }
}
