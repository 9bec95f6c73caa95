//! A cleaned-up view of the GA level `maven-metadata.xml` documents of a repository (see
//!  https://maven.apache.org/ref/3.9.5/maven-repository-metadata/repository-metadata.html),
//!  cached per GA and used to resolve symbolic versions and version ranges.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::error::{ProxyError, ProxyResult};
use crate::maven::coordinates::{ArtifactCoordinates, GaKey};
use crate::maven::metadata_xml::parse_metadata;
use crate::maven::paths::ga_metadata_path;
use crate::maven::version::{sort_versions, ArtifactVersion, QualityRange, VersionRange};
use crate::proxy::context::RequestContext;
use crate::proxy::repository::Repository;
use crate::proxy::update_policy::UpdatePolicy;
use crate::storage::item::now_millis;

pub const LATEST: &str = "LATEST";
pub const RELEASE: &str = "RELEASE";

/// An immutable snapshot of one GA's known versions, sorted by the version order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedGaMetadata {
    pub ga: GaKey,
    pub versions: Vec<String>,
    pub last_check_millis: u64,
}

/// Entries are replaced whole, readers keep the snapshot they got
#[derive(Debug, Default)]
pub struct MetadataCache {
    entries: RwLock<HashMap<GaKey, Arc<CachedGaMetadata>>>,
}

impl MetadataCache {
    pub fn new() -> MetadataCache {
        Default::default()
    }

    pub fn get(&self, ga: &GaKey) -> Option<Arc<CachedGaMetadata>> {
        self.entries.read()
            .unwrap_or_else(|e| e.into_inner())
            .get(ga)
            .cloned()
    }

    pub fn put(&self, metadata: CachedGaMetadata) -> Arc<CachedGaMetadata> {
        let metadata = Arc::new(metadata);
        self.entries.write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(metadata.ga.clone(), metadata.clone());
        metadata
    }

    pub fn remove(&self, ga: &GaKey) -> bool {
        self.entries.write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(ga)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resolves versions of a repository (typically a group) through its `maven-metadata.xml`
///  documents, re-reading them when the cached copy is stale under the update policy
#[derive(Debug, Clone)]
pub struct VersionResolver {
    repository: Arc<dyn Repository>,
    cache: Arc<MetadataCache>,
    policy: UpdatePolicy,
}

impl VersionResolver {
    pub fn new(repository: Arc<dyn Repository>, cache: Arc<MetadataCache>, policy: UpdatePolicy) -> VersionResolver {
        VersionResolver { repository, cache, policy }
    }

    pub fn cache(&self) -> &Arc<MetadataCache> {
        &self.cache
    }

    fn not_found(&self, ga: &GaKey) -> ProxyError {
        ProxyError::not_found(self.repository.id(), &ga_metadata_path(ga))
    }

    pub async fn versions(&self, ga: &GaKey, ctx: &RequestContext) -> ProxyResult<Arc<CachedGaMetadata>> {
        let now = now_millis();
        if let Some(cached) = self.cache.get(ga) {
            if !self.policy.is_stale(cached.last_check_millis, now) {
                return Ok(cached);
            }
            debug!("metadata of {} in {} is stale", ga, self.repository.id());
        }

        // corrupt content is dropped, so a second attempt may find a fresh copy
        for _ in 0..2 {
            match self.load(ga, ctx).await {
                Ok(Some(versions)) => {
                    return Ok(self.cache.put(CachedGaMetadata { ga: ga.clone(), versions, last_check_millis: now }));
                }
                Ok(None) => {}
                Err(e) => {
                    if e.is_not_found() {
                        self.cache.remove(ga);
                    }
                    return Err(e);
                }
            }
        }
        self.cache.remove(ga);
        Err(self.not_found(ga))
    }

    /// `None` if the document exists but does not parse
    async fn load(&self, ga: &GaKey, ctx: &RequestContext) -> ProxyResult<Option<Vec<String>>> {
        let path = ga_metadata_path(ga);
        let item = self.repository.retrieve(&path, &ctx.for_new_operation()).await?;
        let file = item.as_file().ok_or_else(|| self.not_found(ga))?;

        let parsed = match file.read_content().await {
            Ok(content) => parse_metadata(&content),
            Err(e) => Err(e),
        };
        match parsed {
            Ok(metadata) => {
                let mut versions = metadata.versions();
                sort_versions(&mut versions);
                Ok(Some(versions))
            }
            Err(e) => {
                warn!("corrupt metadata for {} in {}: {:#}", ga, self.repository.id(), e);
                self.cache.remove(ga);
                if let Err(e) = self.repository.local_storage().delete(&path).await {
                    warn!("could not drop corrupt metadata {} in {}: {:#}", path, self.repository.id(), e);
                }
                Ok(None)
            }
        }
    }

    /// the highest version whose quality is in `quality`
    pub async fn resolve_latest(&self, ga: &GaKey, quality: QualityRange, ctx: &RequestContext) -> ProxyResult<String> {
        let metadata = self.versions(ga, ctx).await?;
        metadata.versions.iter()
            .map(|v| ArtifactVersion::parse(v))
            .filter(|v| quality.accepts(&v.quality()))
            .max()
            .map(|v| v.as_str().to_string())
            .ok_or_else(|| self.not_found(ga))
    }

    pub async fn resolve_range(&self, ga: &GaKey, range: &VersionRange, ctx: &RequestContext) -> ProxyResult<String> {
        let metadata = self.versions(ga, ctx).await?;
        range.select_latest(metadata.versions.iter().map(|v| v.as_str()))
            .ok_or_else(|| self.not_found(ga))
    }

    /// Replaces `LATEST`, `RELEASE` and version ranges by a concrete version
    pub async fn resolve(&self, coordinates: &ArtifactCoordinates, ctx: &RequestContext) -> ProxyResult<ArtifactCoordinates> {
        let ga = coordinates.ga();
        let version = match coordinates.version.as_str() {
            LATEST => self.resolve_latest(&ga, QualityRange::ALL, ctx).await?,
            RELEASE => self.resolve_latest(&ga, QualityRange::RELEASES_ONLY, ctx).await?,
            _ if coordinates.is_version_range() => {
                let range = VersionRange::parse(&coordinates.version)?;
                self.resolve_range(&ga, &range, ctx).await?
            }
            _ => return Ok(coordinates.clone()),
        };
        debug!("resolved {} to version {}", coordinates, version);
        Ok(coordinates.with_version(&version))
    }
}

#[cfg(test)]
mod test {
    use bytes::Bytes;
    use rstest::*;

    use crate::proxy::hosted::HostedRepository;
    use crate::proxy::repository::RepositoryCore;
    use crate::storage::transient_local_storage::TransientLocalStorage;

    use super::*;

    const METADATA: &str = r#"<metadata><groupId>org.x</groupId><artifactId>a</artifactId><versioning><versions>
        <version>1.0</version><version>2.0-SNAPSHOT</version><version>1.1-beta-2</version><version>1.1</version>
    </versions></versioning></metadata>"#;

    async fn resolver(content: &str, policy: UpdatePolicy) -> (Arc<HostedRepository>, VersionResolver) {
        let repo = Arc::new(HostedRepository::new(RepositoryCore::new("releases", "releases", Arc::new(TransientLocalStorage::new()))));
        repo.store("/org/x/a/maven-metadata.xml", Bytes::from(content.to_string()), &RequestContext::open()).await.unwrap();
        let resolver = VersionResolver::new(repo.clone(), Arc::new(MetadataCache::new()), policy);
        (repo, resolver)
    }

    #[rstest]
    #[case::latest("LATEST", "2.0-SNAPSHOT")]
    #[case::release("RELEASE", "1.1")]
    #[case::range("[1.0,1.1)", "1.1-beta-2")]
    #[case::open_range("[1.0,)", "2.0-SNAPSHOT")]
    #[case::concrete("0.9", "0.9")]
    #[tokio::test]
    async fn test_resolve(#[case] version: &str, #[case] expected: &str) {
        let (_, resolver) = resolver(METADATA, UpdatePolicy::Never).await;
        let coordinates = ArtifactCoordinates::new("org.x", "a", version, None, "jar").unwrap();
        let resolved = resolver.resolve(&coordinates, &RequestContext::open()).await.unwrap();
        assert_eq!(resolved.version, expected);
    }

    #[tokio::test]
    async fn test_cache_follows_update_policy() {
        let ga = GaKey::new("org.x", "a");
        let (repo, resolver) = resolver(METADATA, UpdatePolicy::Never).await;
        assert_eq!(resolver.versions(&ga, &RequestContext::open()).await.unwrap().versions, vec!["1.0", "1.1-beta-2", "1.1", "2.0-SNAPSHOT"]);

        repo.delete("/org/x/a/maven-metadata.xml", &RequestContext::open()).await.unwrap();
        assert_eq!(resolver.versions(&ga, &RequestContext::open()).await.unwrap().versions.len(), 4);

        let always = VersionResolver::new(repo, resolver.cache().clone(), UpdatePolicy::Always);
        assert!(always.versions(&ga, &RequestContext::open()).await.unwrap_err().is_not_found());
        assert!(resolver.cache().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_metadata_is_a_miss() {
        let ga = GaKey::new("org.x", "a");
        let (repo, resolver) = resolver("<metadata><versioning>", UpdatePolicy::Always).await;
        assert!(resolver.versions(&ga, &RequestContext::open()).await.unwrap_err().is_not_found());
        assert!(repo.local_storage().retrieve("/org/x/a/maven-metadata.xml").await.unwrap().is_none());
        assert!(resolver.cache().is_empty());
    }

    #[tokio::test]
    async fn test_no_matching_version() {
        let (_, resolver) = resolver(METADATA, UpdatePolicy::Never).await;
        let result = resolver.resolve_latest(&GaKey::new("org.x", "a"), QualityRange::ALPHA_ONLY, &RequestContext::open()).await;
        assert!(result.unwrap_err().is_not_found());
    }
}
