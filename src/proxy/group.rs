use std::collections::HashSet;
use std::sync::{Arc, RwLock, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, error, info, warn};

use crate::error::{ProxyError, ProxyResult};
use crate::maven::metadata_xml::{merge_metadata, parse_metadata};
use crate::maven::paths::{is_metadata_path, strip_checksum_suffix};
use crate::proxy::context::{Action, RequestContext};
use crate::proxy::mapping::{MappedMembers, RequestRouteMapper};
use crate::proxy::registry::{RegistryEvent, RepositoryRegistry};
use crate::proxy::repository::{Facet, Grouping, Repository, RepositoryCore};
use crate::storage::item::{BytesContentLocator, FileItem, ItemAttributes, StorageItem};
use crate::util::validating_stream::{md5_hex, sha1_hex};

/// A virtual repository answering requests from its members, which are referenced by id and
///  resolved through the registry on every request.
///
/// Members are consulted in declared order, the group's own local storage first. Every request
///  context records the repositories it visited, and a member that was visited before is
///  skipped, so cyclic memberships terminate.
#[derive(Debug)]
pub struct GroupRepository {
    core: RepositoryCore,
    registry: Weak<RepositoryRegistry>,
    members: RwLock<Arc<Vec<String>>>,
    mapper: Arc<RequestRouteMapper>,
}

impl GroupRepository {
    pub fn new(core: RepositoryCore, registry: &Arc<RepositoryRegistry>) -> GroupRepository {
        GroupRepository {
            core,
            registry: Arc::downgrade(registry),
            members: RwLock::new(Arc::new(vec![])),
            mapper: Arc::new(RequestRouteMapper::new()),
        }
    }

    pub fn with_route_mapper(mut self, mapper: Arc<RequestRouteMapper>) -> GroupRepository {
        self.mapper = mapper;
        self
    }

    fn replace_members(&self, members: Vec<String>) {
        {
            let mut current = self.members.write().unwrap_or_else(|e| e.into_inner());
            *current = Arc::new(members);
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.membership_changed(&self.core.id);
        }
    }

    fn mapped_members(&self, path: &str) -> Vec<String> {
        match self.mapper.map(&self.core.id, path, &self.members()) {
            MappedMembers::Blocked => vec![],
            MappedMembers::Members(members) => members,
        }
    }

    /// The members to fan out to, in order. Nothing is marked as visited here: see [`Self::enter`].
    fn resolve_members(&self, path: &str) -> Vec<Arc<dyn Repository>> {
        let Some(registry) = self.registry.upgrade() else {
            error!("{}: the registry is gone, members cannot be resolved", self.core.id);
            return vec![];
        };

        let mut result = vec![];
        for member_id in self.mapped_members(path) {
            match registry.get(&member_id) {
                Ok(member) => result.push(member),
                Err(e) => debug!("{}: skipping member {}: {}", self.core.id, member_id, e),
            }
        }
        result
    }

    /// Marks `member` as visited right before it is consulted. A member visited before during
    ///  this request is skipped: that is what breaks membership cycles.
    fn enter(&self, member: &dyn Repository, ctx: &RequestContext) -> bool {
        if ctx.visit(member.id()) {
            return true;
        }
        info!("{}: member {} was already visited by request {}, skipping", self.core.id, member.id(), ctx.request_id);
        false
    }

    fn log_member_miss(&self, member_id: &str, path: &str, e: &ProxyError) {
        match e {
            ProxyError::Storage(_) => warn!("{}: member {} failed on {}: {}", self.core.id, member_id, path, e),
            _ => debug!("{}: member {} contributes nothing for {}: {}", self.core.id, member_id, path, e),
        }
    }

    fn rewrap(&self, item: StorageItem) -> StorageItem {
        if item.is_collection() {
            let uid = self.core.uid(item.path());
            item.with_uid(uid)
        }
        else {
            item
        }
    }

    /// every member's item at `path`, in member order
    pub async fn retrieve_all(&self, path: &str, ctx: &RequestContext) -> ProxyResult<Vec<StorageItem>> {
        self.core.check_service()?;
        ctx.visit(&self.core.id);
        self.core.check_access(ctx, path, Action::Read)?;

        let mut result = vec![];
        for member in self.resolve_members(path) {
            if !self.enter(member.as_ref(), ctx) {
                continue;
            }
            match member.retrieve(path, ctx).await {
                Ok(item) => result.push(item),
                Err(e) => self.log_member_miss(member.id(), path, &e),
            }
        }
        Ok(result)
    }

    /// `maven-metadata.xml` (or one of its checksums) as the merge of all members' documents
    async fn retrieve_merged_metadata(&self, path: &str, ctx: &RequestContext) -> ProxyResult<StorageItem> {
        let metadata_path = strip_checksum_suffix(path);

        let mut documents = vec![];
        for item in self.retrieve_all(metadata_path, ctx).await? {
            let Some(file) = item.as_file() else { continue };
            let parsed = match file.read_content().await {
                Ok(content) => parse_metadata(&content),
                Err(e) => Err(e),
            };
            match parsed {
                Ok(metadata) => documents.push(metadata),
                Err(e) => warn!("{}: skipping corrupt metadata {}: {:#}", self.core.id, item.uid(), e),
            }
        }

        let merged = merge_metadata(&documents)
            .ok_or_else(|| self.core.not_found(path))?;
        let xml = merged.to_xml();

        let content = if path.ends_with(".sha1") {
            Bytes::from(sha1_hex(xml.as_bytes()))
        }
        else if path.ends_with(".md5") {
            Bytes::from(md5_hex(xml.as_bytes()))
        }
        else {
            Bytes::from(xml)
        };

        debug!("{}: merged {} metadata documents for {}", self.core.id, documents.len(), path);
        let attributes = ItemAttributes {
            sha1: Some(sha1_hex(&content)),
            md5: Some(md5_hex(&content)),
            ..ItemAttributes::checked_now()
        };
        Ok(StorageItem::File(FileItem::new(
            self.core.uid(path),
            content.len() as u64,
            Arc::new(BytesContentLocator::new(content)),
            attributes,
        )))
    }
}

fn is_merged_metadata_path(path: &str) -> bool {
    let stripped = strip_checksum_suffix(path);
    is_metadata_path(stripped) && (stripped == path || path.ends_with(".sha1") || path.ends_with(".md5"))
}

#[async_trait]
impl Repository for GroupRepository {
    fn core(&self) -> &RepositoryCore {
        &self.core
    }

    fn facets(&self) -> &[Facet] {
        &[Facet::Group]
    }

    async fn retrieve(&self, path: &str, ctx: &RequestContext) -> ProxyResult<StorageItem> {
        self.core.check_service()?;
        ctx.visit(&self.core.id);
        self.core.check_access(ctx, path, Action::Read)?;

        if let Some(item) = self.core.retrieve_local(path).await? {
            return Ok(item);
        }

        if is_merged_metadata_path(path) {
            return self.retrieve_merged_metadata(path, ctx).await;
        }

        for member in self.resolve_members(path) {
            if !self.enter(member.as_ref(), ctx) {
                continue;
            }
            match member.retrieve(path, ctx).await {
                Ok(item) => {
                    debug!("{}: {} served by member {}", self.core.id, path, member.id());
                    return Ok(self.rewrap(item));
                }
                Err(e) => self.log_member_miss(member.id(), path, &e),
            }
        }
        Err(self.core.not_found(path))
    }

    /// the union of the group's own and all members' children, the first occurrence of a path wins
    async fn list(&self, path: &str, ctx: &RequestContext) -> ProxyResult<Vec<StorageItem>> {
        self.core.check_service()?;
        ctx.visit(&self.core.id);
        self.core.check_access(ctx, path, Action::Read)?;

        let mut found = false;
        let mut seen = HashSet::new();
        let mut result = vec![];

        if let Some(items) = self.core.list_local(path).await? {
            found = true;
            for item in items {
                if seen.insert(item.path().to_string()) {
                    result.push(item);
                }
            }
        }

        for member in self.resolve_members(path) {
            if !self.enter(member.as_ref(), ctx) {
                continue;
            }
            match member.list(path, ctx).await {
                Ok(items) => {
                    found = true;
                    for item in items {
                        if seen.insert(item.path().to_string()) {
                            result.push(self.rewrap(item));
                        }
                    }
                }
                Err(e) => self.log_member_miss(member.id(), path, &e),
            }
        }

        if !found {
            return Err(self.core.not_found(path));
        }
        Ok(self.core.filter_readable(ctx, result))
    }

    fn as_group(&self) -> Option<&dyn Grouping> {
        Some(self)
    }

    fn on_registry_event(&self, event: &RegistryEvent) {
        if let RegistryEvent::Unregistered { id } = event {
            if id != &self.core.id && self.remove_member(id) {
                info!("{}: removed unregistered member {}", self.core.id, id);
            }
        }
    }
}

impl Grouping for GroupRepository {
    fn members(&self) -> Arc<Vec<String>> {
        self.members.read()
            .map(|m| m.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    fn set_members(&self, members: Vec<String>) -> ProxyResult<()> {
        if members.iter().any(|m| m == &self.core.id) {
            return Err(ProxyError::InvalidArgument(format!("group {} cannot be a member of itself", self.core.id)));
        }
        let mut deduplicated = Vec::with_capacity(members.len());
        for m in members {
            if !deduplicated.contains(&m) {
                deduplicated.push(m);
            }
        }
        self.replace_members(deduplicated);
        Ok(())
    }

    fn add_member(&self, member_id: &str) -> ProxyResult<()> {
        let mut members = (*self.members()).clone();
        if members.iter().any(|m| m == member_id) {
            return Ok(());
        }
        members.push(member_id.to_string());
        self.set_members(members)
    }

    fn remove_member(&self, member_id: &str) -> bool {
        let members = self.members();
        if !members.iter().any(|m| m == member_id) {
            return false;
        }
        self.replace_members(members.iter().filter(|m| *m != member_id).cloned().collect());
        true
    }
}

#[cfg(test)]
mod test {
    use async_trait::async_trait;
    use rstest::*;

    use crate::maven::metadata_xml::Metadata;
    use crate::proxy::hosted::HostedRepository;
    use crate::proxy::mapping::{RepositoryPathRoute, RouteKind};
    use crate::storage::item::LocalEntry;
    use crate::storage::local_storage::LocalStorage;
    use crate::storage::transient_local_storage::TransientLocalStorage;

    use super::*;

    async fn hosted(registry: &Arc<RepositoryRegistry>, id: &str, files: &[(&str, &str)]) {
        let repo = HostedRepository::new(RepositoryCore::new(id, id, Arc::new(TransientLocalStorage::new())));
        for (path, content) in files {
            repo.store(path, Bytes::from(content.to_string()), &RequestContext::open()).await.unwrap();
        }
        registry.register(Arc::new(repo)).unwrap();
    }

    fn group(registry: &Arc<RepositoryRegistry>, id: &str, members: &[&str]) -> Arc<GroupRepository> {
        let group = Arc::new(GroupRepository::new(RepositoryCore::new(id, id, Arc::new(TransientLocalStorage::new())), registry));
        group.set_members(members.iter().map(|m| m.to_string()).collect()).unwrap();
        registry.register(group.clone()).unwrap();
        group
    }

    async fn content(item: &StorageItem) -> String {
        String::from_utf8(item.as_file().unwrap().read_content().await.unwrap().to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_first_member_wins() {
        let registry = Arc::new(RepositoryRegistry::new());
        hosted(&registry, "a", &[("/x.txt", "from a")]).await;
        hosted(&registry, "b", &[("/x.txt", "from b"), ("/y.txt", "from b")]).await;
        let public = group(&registry, "public", &["a", "b"]);

        let ctx = RequestContext::open();
        assert_eq!(content(&public.retrieve("/x.txt", &ctx).await.unwrap()).await, "from a");
        assert_eq!(content(&public.retrieve("/y.txt", &RequestContext::open()).await.unwrap()).await, "from b");
        assert!(public.retrieve("/z.txt", &RequestContext::open()).await.unwrap_err().is_not_found());
    }

    #[rstest]
    #[case::retrieve("/p.txt")]
    #[case::nested_listing("/")]
    #[tokio::test]
    async fn test_shared_member_keeps_depth_first_precedence(#[case] path: &str) {
        let registry = Arc::new(RepositoryRegistry::new());
        hosted(&registry, "b", &[("/p.txt", "from b")]).await;
        hosted(&registry, "c", &[("/p.txt", "from c")]).await;
        group(&registry, "a", &["b", "c"]);
        let g = group(&registry, "g", &["a", "b"]);

        if path == "/p.txt" {
            assert_eq!(content(&g.retrieve(path, &RequestContext::open()).await.unwrap()).await, "from b");
        }
        else {
            let listed = g.list(path, &RequestContext::open()).await.unwrap();
            assert_eq!(listed.len(), 1);
            assert_eq!(content(&listed[0]).await, "from b");
        }
    }

    #[tokio::test]
    async fn test_collections_are_rewrapped() {
        let registry = Arc::new(RepositoryRegistry::new());
        hosted(&registry, "a", &[("/org/x/a.jar", "a")]).await;
        let public = group(&registry, "public", &["a"]);

        let ctx = RequestContext::open();
        let item = public.retrieve("/org/x", &ctx).await.unwrap();
        assert_eq!(item.repository_id(), "public");

        let listed = public.list("/org", &RequestContext::open()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].repository_id(), "public");
    }

    #[tokio::test]
    async fn test_self_membership_is_rejected() {
        let registry = Arc::new(RepositoryRegistry::new());
        let g = group(&registry, "g", &[]);
        assert!(matches!(g.set_members(vec!["g".to_string()]), Err(ProxyError::InvalidArgument(_))));
        assert!(g.add_member("g").is_err());
        g.add_member("a").unwrap();
        g.add_member("a").unwrap();
        assert_eq!(*g.members(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_blocking_route() {
        let registry = Arc::new(RepositoryRegistry::new());
        hosted(&registry, "a", &[("/com/secret/a.jar", "a"), ("/org/a.jar", "a")]).await;

        let mapper = Arc::new(RequestRouteMapper::new());
        mapper.add_route(RepositoryPathRoute::new("block", Some("public"), "^/com/secret/.*", RouteKind::Blocking, vec![]).unwrap());
        let public = Arc::new(GroupRepository::new(RepositoryCore::new("public", "public", Arc::new(TransientLocalStorage::new())), &registry)
            .with_route_mapper(mapper));
        public.set_members(vec!["a".to_string()]).unwrap();

        assert!(public.retrieve("/com/secret/a.jar", &RequestContext::open()).await.unwrap_err().is_not_found());
        assert!(public.retrieve("/org/a.jar", &RequestContext::open()).await.is_ok());
    }

    #[derive(Debug)]
    struct BrokenStorage {}

    #[async_trait]
    impl LocalStorage for BrokenStorage {
        async fn retrieve(&self, _path: &str) -> anyhow::Result<Option<LocalEntry>> {
            Err(anyhow::anyhow!("disk on fire"))
        }

        async fn list(&self, _path: &str) -> anyhow::Result<Option<Vec<LocalEntry>>> {
            Err(anyhow::anyhow!("disk on fire"))
        }

        async fn store(&self, _path: &str, _data: Bytes, _attributes: ItemAttributes) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("disk on fire"))
        }

        async fn update_attributes(&self, _path: &str, _attributes: ItemAttributes) -> anyhow::Result<bool> {
            Err(anyhow::anyhow!("disk on fire"))
        }

        async fn delete(&self, _path: &str) -> anyhow::Result<bool> {
            Err(anyhow::anyhow!("disk on fire"))
        }
    }

    #[tokio::test]
    async fn test_member_failure_does_not_abort_fan_out() {
        let registry = Arc::new(RepositoryRegistry::new());
        registry.register(Arc::new(HostedRepository::new(RepositoryCore::new("broken", "broken", Arc::new(BrokenStorage {}))))).unwrap();
        hosted(&registry, "a", &[("/x.txt", "from a")]).await;
        let public = group(&registry, "public", &["broken", "a"]);

        assert_eq!(content(&public.retrieve("/x.txt", &RequestContext::open()).await.unwrap()).await, "from a");
        assert_eq!(public.list("/", &RequestContext::open()).await.unwrap().len(), 1);
    }

    const META_A: &str = r#"<metadata><groupId>org.x</groupId><artifactId>a</artifactId><versioning><latest>1.1</latest><release>1.1</release><versions><version>1.0</version><version>1.1</version></versions><lastUpdated>20200101000000</lastUpdated></versioning></metadata>"#;
    const META_B: &str = r#"<metadata><groupId>org.x</groupId><artifactId>a</artifactId><versioning><latest>2.0-SNAPSHOT</latest><versions><version>1.0</version><version>2.0-SNAPSHOT</version></versions><lastUpdated>20210101000000</lastUpdated></versioning></metadata>"#;

    #[rstest]
    #[case::plain("/org/x/a/maven-metadata.xml")]
    #[case::sha1("/org/x/a/maven-metadata.xml.sha1")]
    #[tokio::test]
    async fn test_metadata_is_merged(#[case] path: &str) {
        let registry = Arc::new(RepositoryRegistry::new());
        hosted(&registry, "a", &[("/org/x/a/maven-metadata.xml", META_A)]).await;
        hosted(&registry, "b", &[("/org/x/a/maven-metadata.xml", META_B)]).await;
        hosted(&registry, "corrupt", &[("/org/x/a/maven-metadata.xml", "<metadata><versioning>")]).await;
        let public = group(&registry, "public", &["a", "corrupt", "b"]);

        let item = public.retrieve(path, &RequestContext::open()).await.unwrap();
        let merged = public.retrieve("/org/x/a/maven-metadata.xml", &RequestContext::open()).await.unwrap();
        let xml = content(&merged).await;

        if path.ends_with(".sha1") {
            assert_eq!(content(&item).await, sha1_hex(xml.as_bytes()));
            return;
        }

        let metadata: Metadata = parse_metadata(xml.as_bytes()).unwrap();
        let versioning = metadata.versioning.as_ref().unwrap();
        assert_eq!(metadata.versions(), vec!["1.0", "1.1", "2.0-SNAPSHOT"]);
        assert_eq!(versioning.latest.as_deref(), Some("2.0-SNAPSHOT"));
        assert_eq!(versioning.release.as_deref(), Some("1.1"));
        assert_eq!(versioning.last_updated.as_deref(), Some("20210101000000"));
    }
}
