use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;

use crate::storage::item::{ItemAttributes, LocalEntry};

/// The local storage of a single repository: a tree of files and collections addressed by
///  normalized item paths. Collections exist implicitly as ancestors of stored files.
#[async_trait]
pub trait LocalStorage: Debug + Send + Sync {
    async fn retrieve(&self, path: &str) -> anyhow::Result<Option<LocalEntry>>;

    /// direct children of the collection at `path`, `None` if there is no collection there
    async fn list(&self, path: &str) -> anyhow::Result<Option<Vec<LocalEntry>>>;

    /// replaces any previous content at `path`; readers never observe partially written content
    async fn store(&self, path: &str, data: Bytes, attributes: ItemAttributes) -> anyhow::Result<()>;

    /// false if there is no file at `path`
    async fn update_attributes(&self, path: &str, attributes: ItemAttributes) -> anyhow::Result<bool>;

    /// removes a file, or a collection with everything below it; false if nothing was there
    async fn delete(&self, path: &str) -> anyhow::Result<bool>;
}
