use async_trait::async_trait;
use tracing::{error, info};

use crate::error::ProxyResult;
use crate::proxy::registry::RepositoryRegistry;
use crate::tasks::params::{TaskParameters, TaskScope, RESOURCE_STORE_PATH};
use crate::tasks::Task;
use crate::util::item_path;

/// Marks cached content at and below a path as stale and forgets remembered misses, so that the
///  next request for it goes to the remote again
#[derive(Debug, Clone)]
pub struct ExpireCacheTask {
    pub scope: TaskScope,
    pub path: String,
}

impl ExpireCacheTask {
    pub fn from_parameters(params: &TaskParameters, registry: &RepositoryRegistry) -> ProxyResult<ExpireCacheTask> {
        Ok(ExpireCacheTask {
            scope: TaskScope::from_parameters(params, registry)?,
            path: item_path::normalize(params.get(RESOURCE_STORE_PATH).unwrap_or(item_path::ROOT)),
        })
    }
}

#[async_trait]
impl Task for ExpireCacheTask {
    type Output = usize;

    fn name(&self) -> &str {
        "expire repository caches"
    }

    async fn run(&self, registry: &RepositoryRegistry) -> ProxyResult<usize> {
        info!("expiring caches below {} in {:?}", self.path, self.scope);

        let mut expired = 0;
        for repository in self.scope.resolve(registry)? {
            match repository.expire_caches(&self.path).await {
                Ok(n) => expired += n,
                Err(e) => error!("cache expiry in {} failed: {}", repository.id(), e),
            }
        }

        info!("expired {} cache entries", expired);
        Ok(expired)
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use crate::proxy::context::RequestContext;
    use crate::proxy::group::GroupRepository;
    use crate::proxy::proxy_repository::ProxyRepository;
    use crate::proxy::repository::{Grouping, Repository, RepositoryCore};
    use crate::storage::remote_storage::InMemoryRemoteStorage;
    use crate::storage::transient_local_storage::TransientLocalStorage;
    use crate::tasks::params::REPOSITORY_OR_GROUP_ID;

    use super::*;

    const REMOTE: &str = "http://repo.example.com/maven2";

    #[tokio::test]
    async fn test_expire_through_group_scope() {
        let registry = Arc::new(RepositoryRegistry::new());
        let remote = Arc::new(InMemoryRemoteStorage::new());
        remote.put(REMOTE, "/org/x/a.jar", &b"a"[..]);

        let proxy = Arc::new(ProxyRepository::new(RepositoryCore::new("central", "central", Arc::new(TransientLocalStorage::new())), REMOTE, remote.clone()));
        registry.register(proxy.clone()).unwrap();
        let public = GroupRepository::new(RepositoryCore::new("public", "public", Arc::new(TransientLocalStorage::new())), &registry);
        public.set_members(vec!["central".to_string()]).unwrap();
        registry.register(Arc::new(public)).unwrap();

        proxy.retrieve("/org/x/a.jar", &RequestContext::open()).await.unwrap();
        assert!(proxy.retrieve("/org/x/missing.jar", &RequestContext::open()).await.is_err());

        let params = TaskParameters::new()
            .with(REPOSITORY_OR_GROUP_ID, "public")
            .with(RESOURCE_STORE_PATH, "/org");
        let task = ExpireCacheTask::from_parameters(&params, &registry).unwrap();
        assert_eq!(task.path, "/org");
        assert_eq!(task.run(&registry).await.unwrap(), 2);

        assert!(proxy.retrieve("/org/x/missing.jar", &RequestContext::open()).await.is_err());
        proxy.retrieve("/org/x/a.jar", &RequestContext::open()).await.unwrap();
        assert_eq!(remote.fetch_count(), 4);
    }
}
