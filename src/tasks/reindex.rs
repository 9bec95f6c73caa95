use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use tracing::{error, info, trace};

use crate::error::{ProxyError, ProxyResult};
use crate::maven::coordinates::MavenArtifactRef;
use crate::maven::paths::{is_checksum_path, is_metadata_path, parse_maven_path};
use crate::proxy::context::RequestContext;
use crate::proxy::registry::RepositoryRegistry;
use crate::proxy::repository::{Facet, Repository};
use crate::storage::item::StorageItem;
use crate::tasks::params::{TaskParameters, TaskScope};
use crate::tasks::Task;
use crate::walker::filters::FileOnlyFilter;
use crate::walker::{walk, WalkerContext, WalkerProcessor};

/// The search index the reindex tasks feed. Searching is not part of this crate.
#[async_trait]
pub trait ArtifactIndexer: Debug + Send + Sync {
    async fn index_artifact(&self, repository_id: &str, artifact: &MavenArtifactRef, item: &StorageItem) -> anyhow::Result<()>;

    /// makes the index of a repository available to clients
    async fn publish(&self, repository_id: &str) -> anyhow::Result<()>;
}

/// Keeps the indexed paths per repository in memory
#[derive(Debug, Default)]
pub struct InMemoryArtifactIndexer {
    indexed: RwLock<BTreeMap<String, Vec<String>>>,
    published: RwLock<Vec<String>>,
}

impl InMemoryArtifactIndexer {
    pub fn new() -> InMemoryArtifactIndexer {
        Default::default()
    }

    pub fn indexed(&self, repository_id: &str) -> Vec<String> {
        self.indexed.read()
            .map(|i| i.get(repository_id).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn published(&self) -> Vec<String> {
        self.published.read()
            .map(|p| p.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ArtifactIndexer for InMemoryArtifactIndexer {
    async fn index_artifact(&self, repository_id: &str, _artifact: &MavenArtifactRef, item: &StorageItem) -> anyhow::Result<()> {
        let mut indexed = self.indexed.write().map_err(|_| anyhow::anyhow!("index lock poisoned"))?;
        let paths = indexed.entry(repository_id.to_string()).or_default();
        if !paths.iter().any(|p| p == item.path()) {
            paths.push(item.path().to_string());
        }
        Ok(())
    }

    async fn publish(&self, repository_id: &str) -> anyhow::Result<()> {
        let mut published = self.published.write().map_err(|_| anyhow::anyhow!("index lock poisoned"))?;
        published.push(repository_id.to_string());
        Ok(())
    }
}

/// Groups have no content of their own worth indexing, their members are indexed instead
fn is_indexable(repository: &dyn Repository) -> bool {
    !repository.has_facet(Facet::Group)
}

/// Walks repositories and hands every artifact file (neither metadata nor checksum) to the indexer
#[derive(Debug, Clone)]
pub struct ReindexTask {
    pub scope: TaskScope,
    pub indexer: Arc<dyn ArtifactIndexer>,
}

impl ReindexTask {
    pub fn from_parameters(params: &TaskParameters, registry: &RepositoryRegistry, indexer: Arc<dyn ArtifactIndexer>) -> ProxyResult<ReindexTask> {
        Ok(ReindexTask {
            scope: TaskScope::from_parameters(params, registry)?,
            indexer,
        })
    }

    async fn reindex(&self, repository: &dyn Repository) -> ProxyResult<usize> {
        let processor = Arc::new(IndexingProcessor {
            indexer: self.indexer.clone(),
            repository_id: repository.id().to_string(),
            count: Mutex::new(0),
        });
        let ctx = WalkerContext::new(RequestContext::open().with_local_only(true))
            .with_filter(FileOnlyFilter {})
            .with_processor(processor.clone());

        match walk(repository, &ctx).await {
            Ok(_) => Ok(processor.count()),
            Err(e) if e.is_not_found() => Ok(0),
            Err(e) => Err(ProxyError::Storage(anyhow::anyhow!("reindexing {} failed: {}", repository.id(), e))),
        }
    }
}

#[async_trait]
impl Task for ReindexTask {
    type Output = usize;

    fn name(&self) -> &str {
        "reindex repositories"
    }

    async fn run(&self, registry: &RepositoryRegistry) -> ProxyResult<usize> {
        info!("reindexing {:?}", self.scope);
        let mut total = 0;
        for repository in self.scope.resolve(registry)? {
            if !is_indexable(repository.as_ref()) {
                continue;
            }
            match self.reindex(repository.as_ref()).await {
                Ok(n) => {
                    info!("indexed {} artifacts in {}", n, repository.id());
                    total += n;
                }
                Err(e) => error!("{}", e),
            }
        }
        Ok(total)
    }
}

struct IndexingProcessor {
    indexer: Arc<dyn ArtifactIndexer>,
    repository_id: String,
    count: Mutex<usize>,
}

impl IndexingProcessor {
    fn count(&self) -> usize {
        *self.count.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl WalkerProcessor for IndexingProcessor {
    async fn process_item(&self, _ctx: &WalkerContext, item: &StorageItem) -> anyhow::Result<()> {
        let path = item.path();
        if is_metadata_path(path) || is_checksum_path(path) {
            return Ok(());
        }
        let Ok(artifact) = parse_maven_path(path) else {
            trace!("not an artifact: {}", item.uid());
            return Ok(());
        };

        self.indexer.index_artifact(&self.repository_id, &artifact, item).await?;
        *self.count.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }
}

/// Publishes the index of every indexable repository in scope
#[derive(Debug, Clone)]
pub struct PublishIndexesTask {
    pub scope: TaskScope,
    pub indexer: Arc<dyn ArtifactIndexer>,
}

impl PublishIndexesTask {
    pub fn from_parameters(params: &TaskParameters, registry: &RepositoryRegistry, indexer: Arc<dyn ArtifactIndexer>) -> ProxyResult<PublishIndexesTask> {
        Ok(PublishIndexesTask {
            scope: TaskScope::from_parameters(params, registry)?,
            indexer,
        })
    }
}

#[async_trait]
impl Task for PublishIndexesTask {
    type Output = usize;

    fn name(&self) -> &str {
        "publish indexes"
    }

    async fn run(&self, registry: &RepositoryRegistry) -> ProxyResult<usize> {
        let mut published = 0;
        for repository in self.scope.resolve(registry)? {
            if !is_indexable(repository.as_ref()) {
                continue;
            }
            match self.indexer.publish(repository.id()).await {
                Ok(()) => published += 1,
                Err(e) => error!("publishing the index of {} failed: {:#}", repository.id(), e),
            }
        }
        info!("published {} indexes", published);
        Ok(published)
    }
}

#[cfg(test)]
mod test {
    use bytes::Bytes;

    use crate::proxy::group::GroupRepository;
    use crate::proxy::hosted::HostedRepository;
    use crate::proxy::repository::{Grouping, RepositoryCore};
    use crate::storage::transient_local_storage::TransientLocalStorage;
    use crate::tasks::params::REPOSITORY_OR_GROUP_ID;

    use super::*;

    async fn registry() -> Arc<RepositoryRegistry> {
        let registry = Arc::new(RepositoryRegistry::new());
        let releases = HostedRepository::new(RepositoryCore::new("releases", "releases", Arc::new(TransientLocalStorage::new())));
        let ctx = RequestContext::open();
        for path in [
            "/org/x/a/1.0/a-1.0.jar",
            "/org/x/a/1.0/a-1.0.jar.sha1",
            "/org/x/a/1.0/a-1.0.pom",
            "/org/x/a/maven-metadata.xml",
            "/readme.txt",
        ] {
            releases.store(path, Bytes::from_static(b"x"), &ctx).await.unwrap();
        }
        registry.register(Arc::new(releases)).unwrap();

        let public = GroupRepository::new(RepositoryCore::new("public", "public", Arc::new(TransientLocalStorage::new())), &registry);
        public.set_members(vec!["releases".to_string()]).unwrap();
        registry.register(Arc::new(public)).unwrap();
        registry
    }

    #[tokio::test]
    async fn test_reindex_and_publish() {
        let registry = registry().await;
        let indexer = Arc::new(InMemoryArtifactIndexer::new());
        let params = TaskParameters::new().with(REPOSITORY_OR_GROUP_ID, "public");

        let reindex = ReindexTask::from_parameters(&params, &registry, indexer.clone()).unwrap();
        assert_eq!(reindex.run(&registry).await.unwrap(), 2);
        assert_eq!(indexer.indexed("releases"), vec!["/org/x/a/1.0/a-1.0.jar", "/org/x/a/1.0/a-1.0.pom"]);

        let publish = PublishIndexesTask::from_parameters(&params, &registry, indexer.clone()).unwrap();
        assert_eq!(publish.run(&registry).await.unwrap(), 1);
        assert_eq!(indexer.published(), vec!["releases"]);
    }
}
