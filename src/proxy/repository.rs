use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{ProxyError, ProxyResult};
use crate::maven::layout::RepositoryLayout;
use crate::maven::paths::{is_snapshot_path, parse_maven_path};
use crate::proxy::context::{Action, RequestContext};
use crate::proxy::registry::RegistryEvent;
use crate::storage::item::{now_millis, BlobStream, ContentGenerator, ContentLocator, FileItem, ItemAttributes, RepositoryItemUid, StorageItem};
use crate::storage::local_storage::LocalStorage;
use crate::storage::path_cache::{CachedItem, PathCache};
use crate::util::validating_stream::{md5_hex, sha1_hex};

pub const DEFAULT_NOT_FOUND_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Facet {
    Hosted,
    Proxy,
    Group,
    Shadow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalStatus {
    InService,
    OutOfService,
}

/// Which artifact qualities a repository holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepositoryPolicy {
    Release,
    Snapshot,
    #[default]
    Mixed,
}

impl RepositoryPolicy {
    /// Paths that are not artifacts (e.g. GA level metadata) are accepted by every policy
    pub fn accepts_path(&self, path: &str) -> bool {
        match self {
            RepositoryPolicy::Mixed => true,
            RepositoryPolicy::Release => !is_snapshot_path(path),
            RepositoryPolicy::Snapshot => is_snapshot_path(path) || parse_maven_path(path).is_err(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePolicy {
    #[default]
    AllowWrite,
    /// files can be created but not replaced; metadata and checksums are exempt
    AllowWriteOnce,
    ReadOnly,
}

/// The state every repository kind shares. Repositories compose it rather than inheriting
///  behavior from a common base.
#[derive(Debug)]
pub struct RepositoryCore {
    pub id: String,
    pub name: String,
    pub content_class: String,
    pub local_storage: Arc<dyn LocalStorage>,
    pub not_found_cache: PathCache<()>,
    pub not_found_cache_ttl: Duration,
    /// collections are hidden from external requests if false
    pub browseable: bool,
    /// unexposed repositories are not reachable through the router
    pub exposed: bool,
    in_service: AtomicBool,
    generators: HashMap<String, Arc<dyn ContentGenerator>>,
}

impl RepositoryCore {
    pub fn new(id: &str, name: &str, local_storage: Arc<dyn LocalStorage>) -> RepositoryCore {
        RepositoryCore {
            id: id.to_string(),
            name: name.to_string(),
            content_class: RepositoryLayout::Maven2.content_class().to_string(),
            local_storage,
            not_found_cache: PathCache::new(),
            not_found_cache_ttl: DEFAULT_NOT_FOUND_CACHE_TTL,
            browseable: true,
            exposed: true,
            in_service: AtomicBool::new(true),
            generators: HashMap::new(),
        }
    }

    pub fn with_content_class(mut self, content_class: &str) -> RepositoryCore {
        self.content_class = content_class.to_string();
        self
    }

    pub fn with_browseable(mut self, browseable: bool) -> RepositoryCore {
        self.browseable = browseable;
        self
    }

    pub fn with_exposed(mut self, exposed: bool) -> RepositoryCore {
        self.exposed = exposed;
        self
    }

    pub fn with_not_found_cache_ttl(mut self, ttl: Duration) -> RepositoryCore {
        self.not_found_cache_ttl = ttl;
        self
    }

    pub fn with_content_generator(mut self, generator: Arc<dyn ContentGenerator>) -> RepositoryCore {
        self.generators.insert(generator.id().to_string(), generator);
        self
    }

    pub fn uid(&self, path: &str) -> RepositoryItemUid {
        RepositoryItemUid::new(&self.id, path)
    }

    pub fn not_found(&self, path: &str) -> ProxyError {
        ProxyError::not_found(&self.id, path)
    }

    pub fn local_status(&self) -> LocalStatus {
        if self.in_service.load(Ordering::Acquire) {
            LocalStatus::InService
        }
        else {
            LocalStatus::OutOfService
        }
    }

    pub fn set_local_status(&self, status: LocalStatus) {
        self.in_service.store(status == LocalStatus::InService, Ordering::Release);
    }

    pub fn check_service(&self) -> ProxyResult<()> {
        match self.local_status() {
            LocalStatus::InService => Ok(()),
            LocalStatus::OutOfService => Err(ProxyError::RepositoryNotAvailable { repository_id: self.id.clone() }),
        }
    }

    pub fn check_access(&self, ctx: &RequestContext, path: &str, action: Action) -> ProxyResult<()> {
        if ctx.access.is_permitted(&self.id, &self.content_class, path, action) {
            Ok(())
        }
        else {
            Err(ProxyError::AccessDenied { uid: self.uid(path), action })
        }
    }

    pub fn is_readable(&self, ctx: &RequestContext, path: &str) -> bool {
        ctx.access.is_permitted(&self.id, &self.content_class, path, Action::Read)
    }

    /// drops the items the request may not read
    pub fn filter_readable(&self, ctx: &RequestContext, items: Vec<StorageItem>) -> Vec<StorageItem> {
        items.into_iter()
            .filter(|item| self.is_readable(ctx, item.path()))
            .collect()
    }

    fn apply_generator(&self, item: StorageItem) -> Option<StorageItem> {
        let StorageItem::File(file) = item else { return Some(item) };
        let Some(generator_id) = file.content_generator_id() else { return Some(StorageItem::File(file)) };

        match self.generators.get(generator_id) {
            Some(generator) => Some(StorageItem::File(FileItem {
                locator: Arc::new(GeneratedContent { generator: generator.clone(), item: file.clone() }),
                ..file
            })),
            None => {
                warn!("{}: content generator {} is not available", file.uid, generator_id);
                None
            }
        }
    }

    pub async fn retrieve_local(&self, path: &str) -> ProxyResult<Option<StorageItem>> {
        let entry = self.local_storage.retrieve(path).await?;
        Ok(entry
            .map(|e| StorageItem::from_local(&self.id, e))
            .and_then(|item| self.apply_generator(item)))
    }

    pub async fn list_local(&self, path: &str) -> ProxyResult<Option<Vec<StorageItem>>> {
        let entries = self.local_storage.list(path).await?;
        Ok(entries.map(|entries| entries.into_iter()
            .map(|e| StorageItem::from_local(&self.id, e))
            .filter_map(|item| self.apply_generator(item))
            .collect()))
    }

    /// stores content with freshly computed checksums and clears negative cache entries for it
    pub async fn store_local(&self, path: &str, data: Bytes, mut attributes: ItemAttributes) -> ProxyResult<StorageItem> {
        attributes.sha1 = Some(sha1_hex(&data));
        attributes.md5 = Some(md5_hex(&data));
        self.local_storage.store(path, data, attributes).await?;
        self.not_found_cache.remove_with_parents(path);

        self.retrieve_local(path).await?
            .ok_or_else(|| self.not_found(path))
    }

    /// true if `path` was recorded as missing within the not-found TTL
    pub fn is_not_found_cached(&self, path: &str) -> bool {
        match self.not_found_cache.get(path) {
            None => false,
            Some(entry) => {
                let age = now_millis().saturating_sub(entry.last_check_millis);
                if age < self.not_found_cache_ttl.as_millis() as u64 {
                    true
                }
                else {
                    self.not_found_cache.remove(path);
                    false
                }
            }
        }
    }

    pub fn record_not_found(&self, path: &str) {
        debug!("{}: recording {} as not found", self.id, path);
        self.not_found_cache.put(path, ());
    }

    /// clears entries at, below and above `path`
    pub fn expire_not_found_cache(&self, path: &str) -> usize {
        self.not_found_cache.remove_with_children(path) + self.not_found_cache.remove_with_parents(path)
    }
}

#[derive(Debug)]
struct GeneratedContent {
    generator: Arc<dyn ContentGenerator>,
    item: FileItem,
}

#[async_trait]
impl ContentLocator for GeneratedContent {
    fn is_reusable(&self) -> bool {
        true
    }

    async fn content(&self) -> anyhow::Result<BlobStream> {
        self.generator.generate(&self.item).await?
            .content()
            .await
    }
}

/// A repository as seen by the registry, the router and groups. Optional capabilities are exposed
///  through the `as_*` views, writes are rejected unless a kind supports them.
#[async_trait]
pub trait Repository: Debug + Send + Sync {
    fn core(&self) -> &RepositoryCore;

    fn id(&self) -> &str {
        &self.core().id
    }

    fn name(&self) -> &str {
        &self.core().name
    }

    fn facets(&self) -> &[Facet];

    fn has_facet(&self, facet: Facet) -> bool {
        self.facets().contains(&facet)
    }

    fn local_storage(&self) -> &Arc<dyn LocalStorage> {
        &self.core().local_storage
    }

    async fn retrieve(&self, path: &str, ctx: &RequestContext) -> ProxyResult<StorageItem>;

    /// the direct children of the collection at `path`
    async fn list(&self, path: &str, ctx: &RequestContext) -> ProxyResult<Vec<StorageItem>>;

    async fn store(&self, _path: &str, _data: Bytes, _ctx: &RequestContext) -> ProxyResult<StorageItem> {
        Err(ProxyError::illegal_operation(self.id(), "store is not supported"))
    }

    async fn delete(&self, _path: &str, _ctx: &RequestContext) -> ProxyResult<()> {
        Err(ProxyError::illegal_operation(self.id(), "delete is not supported"))
    }

    fn as_proxy(&self) -> Option<&dyn Proxying> {
        None
    }

    fn as_group(&self) -> Option<&dyn Grouping> {
        None
    }

    fn as_layout_converting(&self) -> Option<&dyn LayoutConverting> {
        None
    }

    fn on_registry_event(&self, _event: &RegistryEvent) {}

    /// removes cached copies last checked before `cutoff_millis`, returning their paths
    async fn evict_unused_items(&self, _cutoff_millis: u64) -> ProxyResult<Vec<String>> {
        Ok(vec![])
    }

    /// marks cached content at or below `path` as stale, returning the number of affected entries
    async fn expire_caches(&self, path: &str) -> ProxyResult<usize> {
        Ok(self.expire_not_found_cache(path))
    }

    fn expire_not_found_cache(&self, path: &str) -> usize {
        self.core().expire_not_found_cache(path)
    }
}

/// A repository that mirrors a remote
pub trait Proxying: Send + Sync {
    fn remote_url(&self) -> &str;

    /// true while repeated transport failures keep the remote from being contacted
    fn is_auto_blocked(&self) -> bool;

    fn item_cache(&self) -> &PathCache<CachedItem>;
}

/// A repository aggregating other repositories, referenced by id
pub trait Grouping: Send + Sync {
    /// a consistent snapshot of the membership in declared order
    fn members(&self) -> Arc<Vec<String>>;

    fn set_members(&self, members: Vec<String>) -> ProxyResult<()>;

    fn add_member(&self, member_id: &str) -> ProxyResult<()>;

    fn remove_member(&self, member_id: &str) -> bool;
}

/// A repository presenting another one in a different layout
pub trait LayoutConverting: Send + Sync {
    fn master_id(&self) -> &str;

    fn layout(&self) -> RepositoryLayout;

    /// `None` if the path has no counterpart in the master
    fn to_master_path(&self, path: &str) -> Option<String>;
}

#[cfg(test)]
mod test {
    use rstest::*;

    use crate::storage::item::BytesContentLocator;
    use crate::storage::transient_local_storage::TransientLocalStorage;

    use super::*;

    #[rstest]
    #[case(RepositoryPolicy::Release, "/org/x/a/1.0/a-1.0.jar", true)]
    #[case(RepositoryPolicy::Release, "/org/x/a/1.0-SNAPSHOT/a-1.0-SNAPSHOT.jar", false)]
    #[case(RepositoryPolicy::Snapshot, "/org/x/a/1.0/a-1.0.jar", false)]
    #[case(RepositoryPolicy::Snapshot, "/org/x/a/1.0-SNAPSHOT/a-1.0-20080815.231708-12.jar", true)]
    #[case(RepositoryPolicy::Snapshot, "/org/x/a/maven-metadata.xml", true)]
    #[case(RepositoryPolicy::Mixed, "/org/x/a/1.0-SNAPSHOT/a-1.0-SNAPSHOT.jar", true)]
    fn test_repository_policy(#[case] policy: RepositoryPolicy, #[case] path: &str, #[case] expected: bool) {
        assert_eq!(policy.accepts_path(path), expected);
    }

    #[derive(Debug)]
    struct UpperCase {}

    #[async_trait]
    impl ContentGenerator for UpperCase {
        fn id(&self) -> &str {
            "upper"
        }

        async fn generate(&self, item: &FileItem) -> anyhow::Result<Arc<dyn ContentLocator>> {
            let content = item.read_content().await?;
            Ok(Arc::new(BytesContentLocator::new(Bytes::from(content.to_ascii_uppercase()))))
        }
    }

    fn generated_attributes(generator: &str) -> ItemAttributes {
        ItemAttributes {
            content_generator_id: Some(generator.to_string()),
            ..ItemAttributes::default()
        }
    }

    #[tokio::test]
    async fn test_content_generator() {
        let storage = Arc::new(TransientLocalStorage::new());
        storage.store("/a.txt", Bytes::from_static(b"abc"), generated_attributes("upper")).await.unwrap();
        storage.store("/b.txt", Bytes::from_static(b"abc"), generated_attributes("missing")).await.unwrap();

        let core = RepositoryCore::new("r", "r", storage)
            .with_content_generator(Arc::new(UpperCase {}));

        let item = core.retrieve_local("/a.txt").await.unwrap().unwrap();
        assert_eq!(item.as_file().unwrap().read_content().await.unwrap(), Bytes::from_static(b"ABC"));
        assert!(core.retrieve_local("/b.txt").await.unwrap().is_none());
        assert_eq!(core.list_local("/").await.unwrap().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_store_local_clears_not_found_cache() {
        let core = RepositoryCore::new("r", "r", Arc::new(TransientLocalStorage::new()));
        core.record_not_found("/org/x");
        core.record_not_found("/org/x/a.jar");
        assert!(core.is_not_found_cached("/org/x/a.jar"));

        let item = core.store_local("/org/x/a.jar", Bytes::from_static(b"abc"), ItemAttributes::default()).await.unwrap();
        assert_eq!(item.attributes().sha1.as_deref(), Some("a9993e364706816aba3e25717850c26c9cd0d89d"));
        assert!(!core.is_not_found_cached("/org/x/a.jar"));
        assert!(!core.is_not_found_cached("/org/x"));
    }

    #[test]
    fn test_not_found_cache_ttl() {
        let core = RepositoryCore::new("r", "r", Arc::new(TransientLocalStorage::new()))
            .with_not_found_cache_ttl(Duration::from_millis(1000));
        core.not_found_cache.put_at("/old", (), now_millis() - 2000);
        core.record_not_found("/new");
        assert!(!core.is_not_found_cached("/old"));
        assert!(core.is_not_found_cached("/new"));
        assert_eq!(core.not_found_cache.len(), 1);
    }

    #[test]
    fn test_local_status() {
        let core = RepositoryCore::new("r", "r", Arc::new(TransientLocalStorage::new()));
        assert!(core.check_service().is_ok());
        core.set_local_status(LocalStatus::OutOfService);
        assert!(matches!(core.check_service(), Err(ProxyError::RepositoryNotAvailable { .. })));
    }
}
