use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use failsafe::{backoff, failure_policy, CircuitBreaker, StateMachine};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace, warn};

use crate::error::{ProxyError, ProxyResult};
use crate::maven::paths::is_metadata_path;
use crate::proxy::context::{Action, RequestContext};
use crate::proxy::repository::{Facet, Proxying, Repository, RepositoryCore, RepositoryPolicy};
use crate::proxy::update_policy::UpdatePolicy;
use crate::storage::item::{now_millis, ItemAttributes, StorageItem};
use crate::storage::local_storage::LocalStorage;
use crate::storage::path_cache::{CachedItem, PathCache};
use crate::storage::remote_storage::{remote_url, RemoteError, RemoteStorage};
use crate::util::item_path;
use crate::walker::{walk, WalkerContext, WalkerProcessor};

pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_AUTO_BLOCK_FAILURES: u32 = 5;
pub const DEFAULT_AUTO_BLOCK_DURATION: Duration = Duration::from_secs(30);

type AutoBlock = StateMachine<failure_policy::ConsecutiveFailures<backoff::Constant>, ()>;

fn auto_block(consecutive_failures: u32, block_for: Duration) -> AutoBlock {
    failsafe::Config::new()
        .failure_policy(failure_policy::consecutive_failures(consecutive_failures, backoff::constant(block_for)))
        .build()
}

struct Fetched {
    url: String,
    data: Bytes,
}

/// A repository mirroring a remote. Local storage serves as the cache of remote content; what is
///  not held locally is fetched, verified and stored before it is returned.
pub struct ProxyRepository {
    core: RepositoryCore,
    remote_url: String,
    remote: Arc<dyn RemoteStorage>,
    item_cache: Arc<PathCache<CachedItem>>,
    repository_policy: RepositoryPolicy,
    artifact_max_age: UpdatePolicy,
    metadata_max_age: UpdatePolicy,
    remote_timeout: Duration,
    auto_block: AutoBlock,
}

impl Debug for ProxyRepository {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyRepository")
            .field("core", &self.core)
            .field("remote_url", &self.remote_url)
            .field("repository_policy", &self.repository_policy)
            .field("artifact_max_age", &self.artifact_max_age)
            .field("metadata_max_age", &self.metadata_max_age)
            .field("remote_timeout", &self.remote_timeout)
            .field("auto_blocked", &self.is_auto_blocked())
            .finish()
    }
}

impl ProxyRepository {
    pub fn new(core: RepositoryCore, remote_url: &str, remote: Arc<dyn RemoteStorage>) -> ProxyRepository {
        ProxyRepository {
            core,
            remote_url: remote_url.to_string(),
            remote,
            item_cache: Arc::new(PathCache::new()),
            repository_policy: RepositoryPolicy::Mixed,
            artifact_max_age: UpdatePolicy::Never,
            metadata_max_age: UpdatePolicy::Daily,
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
            auto_block: auto_block(DEFAULT_AUTO_BLOCK_FAILURES, DEFAULT_AUTO_BLOCK_DURATION),
        }
    }

    pub fn with_repository_policy(mut self, repository_policy: RepositoryPolicy) -> ProxyRepository {
        self.repository_policy = repository_policy;
        self
    }

    pub fn with_artifact_max_age(mut self, policy: UpdatePolicy) -> ProxyRepository {
        self.artifact_max_age = policy;
        self
    }

    pub fn with_metadata_max_age(mut self, policy: UpdatePolicy) -> ProxyRepository {
        self.metadata_max_age = policy;
        self
    }

    pub fn with_remote_timeout(mut self, timeout: Duration) -> ProxyRepository {
        self.remote_timeout = timeout;
        self
    }

    /// the remote is skipped for `block_for` after `consecutive_failures` transport failures in a row
    pub fn with_auto_block(mut self, consecutive_failures: u32, block_for: Duration) -> ProxyRepository {
        self.auto_block = auto_block(consecutive_failures, block_for);
        self
    }

    fn update_policy_for(&self, path: &str) -> UpdatePolicy {
        if is_metadata_path(path.trim_end_matches(".sha1").trim_end_matches(".md5")) {
            self.metadata_max_age
        }
        else {
            self.artifact_max_age
        }
    }

    fn is_stale(&self, item: &StorageItem) -> bool {
        let attributes = item.attributes();
        attributes.expired || self.update_policy_for(item.path()).is_stale(attributes.last_check_millis, now_millis())
    }

    async fn fetch_remote(&self, path: &str, ctx: &RequestContext) -> Result<Fetched, RemoteError> {
        let url = remote_url(&self.remote_url, path);
        let mut deadline = Instant::now() + self.remote_timeout;
        if let Some(request_deadline) = ctx.deadline {
            deadline = deadline.min(request_deadline);
        }

        let fetch = async {
            let content = self.remote.fetch(&self.remote_url, path).await?;
            let url = content.url.clone();
            let data = content.into_bytes().await?;
            Ok::<_, RemoteError>(Fetched { url, data })
        };

        match timeout_at(deadline, fetch).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout { url }),
        }
    }

    /// Fetches `path` from the remote and stores it locally. The outer result carries local
    ///  storage failures, the inner one why the remote could not deliver.
    async fn fetch_and_cache(&self, path: &str, ctx: &RequestContext) -> ProxyResult<Result<StorageItem, RemoteError>> {
        let url = remote_url(&self.remote_url, path);
        if !self.auto_block.is_call_permitted() {
            return Ok(Err(RemoteError::Blocked { url }));
        }

        trace!("{}: fetching {}", self.core.id, url);
        let outcome = self.fetch_remote(path, ctx).await;
        let fetched = match self.auto_block.call_with(|e: &RemoteError| e.is_transport(), move || outcome) {
            Ok(fetched) => fetched,
            Err(failsafe::Error::Inner(e)) => return Ok(Err(e)),
            Err(failsafe::Error::Rejected) => return Ok(Err(RemoteError::Blocked { url })),
        };

        let length = fetched.data.len() as u64;
        let attributes = ItemAttributes {
            remote_url: Some(fetched.url.clone()),
            ..ItemAttributes::checked_now()
        };
        let item = self.core.store_local(path, fetched.data, attributes).await?;
        self.item_cache.put(path, CachedItem { length, remote_url: Some(fetched.url) });
        debug!("{}: cached {} ({} bytes)", self.core.id, path, length);
        Ok(Ok(item))
    }

    fn log_remote_failure(&self, path: &str, e: &RemoteError) {
        match e {
            RemoteError::NotFound { .. } | RemoteError::Blocked { .. } => debug!("{}: {} unavailable: {}", self.core.id, path, e),
            _ => warn!("{}: {} unavailable: {}", self.core.id, path, e),
        }
    }
}

#[async_trait]
impl Repository for ProxyRepository {
    fn core(&self) -> &RepositoryCore {
        &self.core
    }

    fn facets(&self) -> &[Facet] {
        &[Facet::Proxy]
    }

    async fn retrieve(&self, path: &str, ctx: &RequestContext) -> ProxyResult<StorageItem> {
        self.core.check_service()?;
        ctx.visit(&self.core.id);
        self.core.check_access(ctx, path, Action::Read)?;

        let local = if ctx.remote_only {
            None
        }
        else {
            self.core.retrieve_local(path).await?
        };

        let stale = match local {
            Some(item) if item.is_collection() || ctx.local_only || item_path::is_local_only(path) || !self.is_stale(&item) => {
                return Ok(item);
            }
            other => other,
        };

        if ctx.local_only || item_path::is_local_only(path) {
            return Err(self.core.not_found(path));
        }
        if !self.repository_policy.accepts_path(path) {
            debug!("{}: {} does not match the repository policy {:?}", self.core.id, path, self.repository_policy);
            return Err(self.core.not_found(path));
        }
        if stale.is_none() && self.core.is_not_found_cached(path) {
            debug!("{}: {} is in the not-found cache", self.core.id, path);
            return Err(self.core.not_found(path));
        }

        match self.fetch_and_cache(path, ctx).await? {
            Ok(item) => Ok(item),
            Err(e) => {
                self.log_remote_failure(path, &e);
                match stale {
                    Some(item) => {
                        debug!("{}: serving stale copy of {}", self.core.id, path);
                        Ok(item)
                    }
                    None => {
                        if matches!(e, RemoteError::NotFound { .. }) {
                            self.core.record_not_found(path);
                        }
                        Err(self.core.not_found(path))
                    }
                }
            }
        }
    }

    async fn list(&self, path: &str, ctx: &RequestContext) -> ProxyResult<Vec<StorageItem>> {
        self.core.check_service()?;
        ctx.visit(&self.core.id);
        self.core.check_access(ctx, path, Action::Read)?;

        let items = self.core.list_local(path).await?
            .ok_or_else(|| self.core.not_found(path))?;
        Ok(self.core.filter_readable(ctx, items))
    }

    async fn delete(&self, path: &str, ctx: &RequestContext) -> ProxyResult<()> {
        self.core.check_service()?;
        self.core.check_access(ctx, path, Action::Delete)?;

        let deleted = self.core.local_storage.delete(path).await?;
        let uncached = self.item_cache.remove_with_children(path);
        if !deleted && uncached == 0 {
            return Err(self.core.not_found(path));
        }
        debug!("{}: deleted cached copy of {}", self.core.id, path);
        Ok(())
    }

    fn as_proxy(&self) -> Option<&dyn Proxying> {
        Some(self)
    }

    async fn evict_unused_items(&self, cutoff_millis: u64) -> ProxyResult<Vec<String>> {
        let processor = Arc::new(EvictionProcessor {
            local_storage: self.core.local_storage.clone(),
            item_cache: self.item_cache.clone(),
            cutoff_millis,
            evicted: Mutex::new(vec![]),
        });
        let ctx = WalkerContext::new(RequestContext::open().with_local_only(true))
            .with_processor(processor.clone());

        if let Err(e) = walk(self, &ctx).await {
            if !e.is_not_found() {
                return Err(ProxyError::Storage(anyhow::anyhow!("eviction in {} failed: {}", self.core.id, e)));
            }
        }

        let mut evicted = processor.evicted();
        for path in self.item_cache.entries_older_than(cutoff_millis) {
            self.item_cache.remove(&path);
            evicted.push(path);
        }
        evicted.sort();
        evicted.dedup();
        debug!("{}: evicted {} items", self.core.id, evicted.len());
        Ok(evicted)
    }

    async fn expire_caches(&self, path: &str) -> ProxyResult<usize> {
        let processor = Arc::new(ExpiryProcessor {
            local_storage: self.core.local_storage.clone(),
            expired: Mutex::new(0),
        });
        let ctx = WalkerContext::new(RequestContext::open().with_local_only(true))
            .with_start_path(path)
            .with_processor(processor.clone());

        if let Err(e) = walk(self, &ctx).await {
            if !e.is_not_found() {
                return Err(ProxyError::Storage(anyhow::anyhow!("cache expiry in {} failed: {}", self.core.id, e)));
            }
        }
        Ok(processor.expired() + self.core.expire_not_found_cache(path))
    }
}

impl Proxying for ProxyRepository {
    fn remote_url(&self) -> &str {
        &self.remote_url
    }

    fn is_auto_blocked(&self) -> bool {
        !self.auto_block.is_call_permitted()
    }

    fn item_cache(&self) -> &PathCache<CachedItem> {
        &self.item_cache
    }
}

/// Removes proxied files last checked before the cutoff
struct EvictionProcessor {
    local_storage: Arc<dyn LocalStorage>,
    item_cache: Arc<PathCache<CachedItem>>,
    cutoff_millis: u64,
    evicted: Mutex<Vec<String>>,
}

impl EvictionProcessor {
    fn evicted(&self) -> Vec<String> {
        self.evicted.lock()
            .map(|e| e.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }
}

#[async_trait]
impl WalkerProcessor for EvictionProcessor {
    async fn process_item(&self, _ctx: &WalkerContext, item: &StorageItem) -> anyhow::Result<()> {
        if item.is_collection() || item_path::is_local_only(item.path()) {
            return Ok(());
        }

        let last_check = self.item_cache.get(item.path())
            .map(|e| e.last_check_millis)
            .unwrap_or(item.attributes().last_check_millis);
        if last_check >= self.cutoff_millis {
            return Ok(());
        }

        trace!("evicting {}", item.uid());
        self.local_storage.delete(item.path()).await?;
        self.item_cache.remove(item.path());
        self.evicted.lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(item.path().to_string());
        Ok(())
    }
}

/// Marks cached files as expired, so that the next request re-checks the remote
struct ExpiryProcessor {
    local_storage: Arc<dyn LocalStorage>,
    expired: Mutex<usize>,
}

impl ExpiryProcessor {
    fn expired(&self) -> usize {
        *self.expired.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl WalkerProcessor for ExpiryProcessor {
    async fn process_item(&self, _ctx: &WalkerContext, item: &StorageItem) -> anyhow::Result<()> {
        if item.is_collection() || item.attributes().expired {
            return Ok(());
        }

        let attributes = ItemAttributes {
            expired: true,
            ..item.attributes().clone()
        };
        if self.local_storage.update_attributes(item.path(), attributes).await? {
            *self.expired.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        }
        Ok(())
    }
}
