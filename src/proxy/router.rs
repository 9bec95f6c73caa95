use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use crate::error::{ProxyError, ProxyResult};
use crate::proxy::context::RequestContext;
use crate::proxy::registry::RepositoryRegistry;
use crate::proxy::repository::{Facet, Repository};
use crate::storage::item::{RepositoryItemUid, StorageItem};
use crate::util::item_path;

pub const REPOSITORIES_PREFIX: &str = "repositories";
pub const GROUPS_PREFIX: &str = "groups";

/// the repository id of the virtual collections above the repositories
pub const VIRTUAL_REPOSITORY_ID: &str = "";

enum Route {
    Root,
    /// `/repositories` or `/groups`, with the facet its repositories must have
    Namespace(Option<Facet>),
    Repository {
        repository: Arc<dyn Repository>,
        prefix: String,
        path: String,
    },
}

/// Resolves request paths of the form `/repositories/<id>/<path>` and `/groups/<id>/<path>` to
///  the owning repository and presents the results under the request path.
#[derive(Debug, Clone)]
pub struct RepositoryRouter {
    registry: Arc<RepositoryRegistry>,
}

impl RepositoryRouter {
    pub fn new(registry: Arc<RepositoryRegistry>) -> RepositoryRouter {
        RepositoryRouter { registry }
    }

    pub fn registry(&self) -> &Arc<RepositoryRegistry> {
        &self.registry
    }

    fn not_found(path: &str) -> ProxyError {
        ProxyError::not_found(VIRTUAL_REPOSITORY_ID, path)
    }

    fn route(&self, request_path: &str) -> ProxyResult<Route> {
        let mut segments = item_path::segments(request_path);

        let (namespace, required) = match segments.next() {
            None => return Ok(Route::Root),
            Some(REPOSITORIES_PREFIX) => (REPOSITORIES_PREFIX, None),
            Some(GROUPS_PREFIX) => (GROUPS_PREFIX, Some(Facet::Group)),
            Some(_) => return Err(Self::not_found(request_path)),
        };
        let Some(id) = segments.next() else {
            return Ok(Route::Namespace(required));
        };

        let repository = match self.registry.get(id) {
            Ok(r) if r.core().exposed => r,
            _ => return Err(Self::not_found(request_path)),
        };
        if let Some(facet) = required {
            if !repository.has_facet(facet) {
                return Err(Self::not_found(request_path));
            }
        }

        let prefix = format!("/{}/{}", namespace, id);
        let path = item_path::normalize(&segments.collect::<Vec<_>>().join("/"));
        Ok(Route::Repository { repository, prefix, path })
    }

    fn listed_repositories(&self, required: Option<Facet>) -> Vec<Arc<dyn Repository>> {
        self.registry.repositories().into_iter()
            .filter(|r| r.core().exposed && r.core().browseable)
            .filter(|r| required.map_or(true, |f| r.has_facet(f)))
            .collect()
    }

    fn virtual_collection(path: &str) -> StorageItem {
        StorageItem::collection(RepositoryItemUid::new(VIRTUAL_REPOSITORY_ID, &item_path::normalize(path)))
    }

    fn repath(item: StorageItem, prefix: &str) -> StorageItem {
        let path = item_path::join(prefix, item.path());
        let uid = RepositoryItemUid::new(item.repository_id(), &path);
        item.with_uid(uid)
    }

    pub async fn retrieve(&self, request_path: &str, ctx: &RequestContext) -> ProxyResult<StorageItem> {
        match self.route(request_path)? {
            Route::Root | Route::Namespace(_) => Ok(Self::virtual_collection(request_path)),
            Route::Repository { repository, prefix, path } => {
                debug!("routing {} to repository {}", request_path, repository.id());
                let item = repository.retrieve(&path, ctx).await?;
                if item.is_collection() && !repository.core().browseable {
                    return Err(Self::not_found(request_path));
                }
                Ok(Self::repath(item, &prefix))
            }
        }
    }

    pub async fn list(&self, request_path: &str, ctx: &RequestContext) -> ProxyResult<Vec<StorageItem>> {
        match self.route(request_path)? {
            Route::Root => Ok(vec![
                Self::virtual_collection(&format!("/{}", GROUPS_PREFIX)),
                Self::virtual_collection(&format!("/{}", REPOSITORIES_PREFIX)),
            ]),
            Route::Namespace(required) => {
                let prefix = item_path::normalize(request_path);
                Ok(self.listed_repositories(required).iter()
                    .map(|r| Self::virtual_collection(&item_path::join(&prefix, r.id())))
                    .collect())
            }
            Route::Repository { repository, prefix, path } => {
                if !repository.core().browseable {
                    return Err(Self::not_found(request_path));
                }
                let items = repository.list(&path, ctx).await?;
                Ok(items.into_iter()
                    .map(|item| Self::repath(item, &prefix))
                    .collect())
            }
        }
    }

    pub async fn store(&self, request_path: &str, data: Bytes, ctx: &RequestContext) -> ProxyResult<StorageItem> {
        match self.route(request_path)? {
            Route::Root | Route::Namespace(_) =>
                Err(ProxyError::illegal_operation(VIRTUAL_REPOSITORY_ID, format!("cannot store at {}", request_path))),
            Route::Repository { repository, prefix, path } => {
                let item = repository.store(&path, data, ctx).await?;
                Ok(Self::repath(item, &prefix))
            }
        }
    }

    pub async fn delete(&self, request_path: &str, ctx: &RequestContext) -> ProxyResult<()> {
        match self.route(request_path)? {
            Route::Root | Route::Namespace(_) =>
                Err(ProxyError::illegal_operation(VIRTUAL_REPOSITORY_ID, format!("cannot delete {}", request_path))),
            Route::Repository { repository, path, .. } => repository.delete(&path, ctx).await,
        }
    }
}

#[cfg(test)]
mod test {
    use rstest::*;

    use crate::proxy::group::GroupRepository;
    use crate::proxy::hosted::HostedRepository;
    use crate::proxy::repository::{Grouping, RepositoryCore};
    use crate::storage::transient_local_storage::TransientLocalStorage;

    use super::*;

    async fn router() -> RepositoryRouter {
        let registry = Arc::new(RepositoryRegistry::new());

        let releases = HostedRepository::new(RepositoryCore::new("releases", "Releases", Arc::new(TransientLocalStorage::new())));
        releases.store("/org/x/a.jar", Bytes::from_static(b"a"), &RequestContext::open()).await.unwrap();
        registry.register(Arc::new(releases)).unwrap();

        let hidden = HostedRepository::new(RepositoryCore::new("hidden", "Hidden", Arc::new(TransientLocalStorage::new()))
            .with_exposed(false));
        registry.register(Arc::new(hidden)).unwrap();

        let closed = HostedRepository::new(RepositoryCore::new("closed", "Closed", Arc::new(TransientLocalStorage::new()))
            .with_browseable(false));
        closed.store("/b.jar", Bytes::from_static(b"b"), &RequestContext::open()).await.unwrap();
        registry.register(Arc::new(closed)).unwrap();

        let public = GroupRepository::new(RepositoryCore::new("public", "Public", Arc::new(TransientLocalStorage::new())), &registry);
        public.set_members(vec!["releases".to_string()]).unwrap();
        registry.register(Arc::new(public)).unwrap();

        RepositoryRouter::new(registry)
    }

    #[rstest]
    #[case::repository("/repositories/releases/org/x/a.jar", "releases")]
    #[case::group("/groups/public/org/x/a.jar", "releases")]
    #[case::group_as_repository("/repositories/public/org/x/a.jar", "releases")]
    #[case::not_browseable_file("/repositories/closed/b.jar", "closed")]
    #[tokio::test]
    async fn test_retrieve(#[case] path: &str, #[case] repository_id: &str) {
        let router = router().await;
        let item = router.retrieve(path, &RequestContext::open()).await.unwrap();
        assert_eq!(item.path(), path);
        assert_eq!(item.repository_id(), repository_id);
    }

    #[rstest]
    #[case::unknown_prefix("/other/releases/org/x/a.jar")]
    #[case::unknown_repository("/repositories/nope/org/x/a.jar")]
    #[case::unexposed("/repositories/hidden/x")]
    #[case::not_a_group("/groups/releases/org/x/a.jar")]
    #[case::not_browseable_collection("/repositories/closed/")]
    #[tokio::test]
    async fn test_not_found(#[case] path: &str) {
        let router = router().await;
        assert!(router.retrieve(path, &RequestContext::open()).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_virtual_collections() {
        let router = router().await;
        let ctx = RequestContext::open();

        let paths = |items: Vec<StorageItem>| items.iter().map(|i| i.path().to_string()).collect::<Vec<_>>();
        assert_eq!(paths(router.list("/", &ctx).await.unwrap()), vec!["/groups", "/repositories"]);
        assert_eq!(paths(router.list("/repositories", &ctx).await.unwrap()), vec!["/repositories/public", "/repositories/releases"]);
        assert_eq!(paths(router.list("/groups/", &ctx).await.unwrap()), vec!["/groups/public"]);
        assert_eq!(paths(router.list("/groups/public/org", &ctx).await.unwrap()), vec!["/groups/public/org/x"]);
        assert!(router.list("/repositories/closed", &ctx).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_writes() {
        let router = router().await;
        let ctx = RequestContext::open();

        let stored = router.store("/repositories/releases/org/y/b.jar", Bytes::from_static(b"b"), &ctx).await.unwrap();
        assert_eq!(stored.path(), "/repositories/releases/org/y/b.jar");
        assert!(matches!(router.store("/groups/public/c.jar", Bytes::new(), &ctx).await, Err(ProxyError::IllegalOperation { .. })));
        assert!(matches!(router.store("/repositories", Bytes::new(), &ctx).await, Err(ProxyError::IllegalOperation { .. })));

        router.delete("/repositories/releases/org/y", &ctx).await.unwrap();
        assert!(router.retrieve("/repositories/releases/org/y/b.jar", &ctx).await.unwrap_err().is_not_found());
    }
}
