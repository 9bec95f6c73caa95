use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDateTime;
use tracing::{debug, error, info};

use crate::error::{ProxyError, ProxyResult};
use crate::maven::coordinates::MavenVersion;
use crate::maven::paths::{parse_maven_path, strip_checksum_suffix, SNAPSHOT_SUFFIX};
use crate::maven::version::compare_versions;
use crate::proxy::context::RequestContext;
use crate::proxy::registry::RepositoryRegistry;
use crate::proxy::repository::{Facet, Repository};
use crate::storage::item::{now_millis, RepositoryItemUid, StorageItem};
use crate::tasks::params::{TaskParameters, TaskScope, MIN_SNAPSHOTS_TO_KEEP, REMOVE_IF_RELEASE_EXISTS, REMOVE_OLDER_THAN_DAYS};
use crate::tasks::Task;
use crate::util::item_path;
use crate::walker::{walk, WalkerContext, WalkerProcessor};

pub const DEFAULT_MIN_SNAPSHOTS_TO_KEEP: usize = 1;
const MILLIS_PER_DAY: u64 = 24 * 60 * 60 * 1000;

/// Removes timestamped snapshot builds from hosted and proxy repositories.
///
/// Per snapshot version directory, the newest `min_snapshots_to_keep` builds (by version order)
///  always survive; older ones go if their build timestamp is older than `remove_older_than_days`,
///  or unconditionally if no age is given. If `remove_if_release_exists` is set and the matching
///  release directory exists, all builds go.
#[derive(Debug, Clone)]
pub struct SnapshotRemoverTask {
    pub scope: TaskScope,
    pub min_snapshots_to_keep: usize,
    pub remove_older_than_days: Option<u32>,
    pub remove_if_release_exists: bool,
}

impl SnapshotRemoverTask {
    pub fn from_parameters(params: &TaskParameters, registry: &RepositoryRegistry) -> ProxyResult<SnapshotRemoverTask> {
        Ok(SnapshotRemoverTask {
            scope: TaskScope::from_parameters(params, registry)?,
            min_snapshots_to_keep: params.parse_or(MIN_SNAPSHOTS_TO_KEEP, DEFAULT_MIN_SNAPSHOTS_TO_KEEP)?,
            // negative means 'no age limit'
            remove_older_than_days: params.parse::<i64>(REMOVE_OLDER_THAN_DAYS)?
                .and_then(|d| u32::try_from(d).ok()),
            remove_if_release_exists: params.parse_or(REMOVE_IF_RELEASE_EXISTS, false)?,
        })
    }

    fn select_for_removal(&self, mut builds: Vec<SnapshotBuild>, release_exists: bool, cutoff_millis: Option<u64>) -> Vec<SnapshotBuild> {
        if release_exists && self.remove_if_release_exists {
            return builds;
        }

        builds.sort_by(|a, b| compare_versions(&b.file_version, &a.file_version));
        builds.into_iter()
            .skip(self.min_snapshots_to_keep)
            .filter(|b| match (cutoff_millis, b.timestamp_millis) {
                (None, _) => true,
                (Some(cutoff), Some(ts)) => ts < cutoff,
                (Some(_), None) => false,
            })
            .collect()
    }

    async fn remove_in(&self, repository: &dyn Repository, cutoff_millis: Option<u64>) -> ProxyResult<Vec<RepositoryItemUid>> {
        let collector = Arc::new(SnapshotCollector::default());
        let walker_ctx = WalkerContext::new(RequestContext::open().with_local_only(true))
            .with_processor(collector.clone());
        if let Err(e) = walk(repository, &walker_ctx).await {
            if !e.is_not_found() {
                return Err(ProxyError::Storage(anyhow::anyhow!("snapshot removal in {} failed: {}", repository.id(), e)));
            }
        }

        let ctx = RequestContext::open();
        let mut removed = vec![];
        for (version_dir, builds) in collector.take() {
            let release_exists = match release_dir(&version_dir) {
                Some(dir) => repository.local_storage().retrieve(&dir).await?
                    .map_or(false, |e| e.is_collection()),
                None => false,
            };

            for build in self.select_for_removal(builds.into_values().collect(), release_exists, cutoff_millis) {
                debug!("{}: removing snapshot build {} in {}", repository.id(), build.file_version, version_dir);
                for path in build.paths {
                    match repository.delete(&path, &ctx).await {
                        Ok(()) => removed.push(RepositoryItemUid::new(repository.id(), &path)),
                        Err(e) if e.is_not_found() => {}
                        Err(e) => error!("{}: could not remove {}: {}", repository.id(), path, e),
                    }
                }
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl Task for SnapshotRemoverTask {
    type Output = Vec<RepositoryItemUid>;

    fn name(&self) -> &str {
        "remove snapshots"
    }

    async fn run(&self, registry: &RepositoryRegistry) -> ProxyResult<Vec<RepositoryItemUid>> {
        info!("removing snapshots in {:?}, keeping at least {}", self.scope, self.min_snapshots_to_keep);
        let cutoff_millis = self.remove_older_than_days
            .map(|days| now_millis().saturating_sub(days as u64 * MILLIS_PER_DAY));

        let mut removed = vec![];
        for repository in self.scope.resolve(registry)? {
            if !(repository.has_facet(Facet::Hosted) || repository.has_facet(Facet::Proxy)) {
                continue;
            }
            match self.remove_in(repository.as_ref(), cutoff_millis).await {
                Ok(r) => removed.extend(r),
                Err(e) => error!("snapshot removal in {} failed: {}", repository.id(), e),
            }
        }

        info!("removed {} snapshot files", removed.len());
        Ok(removed)
    }
}

/// `/org/x/a/1.0-SNAPSHOT` -> `/org/x/a/1.0`
fn release_dir(version_dir: &str) -> Option<String> {
    let parent = item_path::parent(version_dir)?;
    let release = item_path::name(version_dir).strip_suffix(SNAPSHOT_SUFFIX)?;
    Some(item_path::join(&parent, release))
}

/// `yyyyMMdd.HHmmss` (UTC) as epoch millis, `None` for anything that is not a real point in time
fn timestamp_millis(timestamp: &str) -> Option<u64> {
    let parsed = NaiveDateTime::parse_from_str(timestamp, "%Y%m%d.%H%M%S").ok()?;
    u64::try_from(parsed.and_utc().timestamp_millis()).ok()
}

#[derive(Debug, Clone)]
struct SnapshotBuild {
    file_version: String,
    timestamp_millis: Option<u64>,
    /// every file of the build, checksums included
    paths: Vec<String>,
}

/// version directory -> file version -> build
#[derive(Default)]
struct SnapshotCollector {
    builds: Mutex<BTreeMap<String, BTreeMap<String, SnapshotBuild>>>,
}

impl SnapshotCollector {
    fn take(&self) -> BTreeMap<String, BTreeMap<String, SnapshotBuild>> {
        std::mem::take(&mut *self.builds.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

#[async_trait]
impl WalkerProcessor for SnapshotCollector {
    async fn process_item(&self, _ctx: &WalkerContext, item: &StorageItem) -> anyhow::Result<()> {
        if item.is_collection() {
            return Ok(());
        }
        let Ok(artifact) = parse_maven_path(strip_checksum_suffix(item.path())) else { return Ok(()) };
        let MavenVersion::Timestamped { timestamp, .. } = &artifact.version else { return Ok(()) };
        let Some(version_dir) = item_path::parent(item.path()) else { return Ok(()) };

        let file_version = artifact.version.file_version();
        let mut builds = self.builds.lock().unwrap_or_else(|e| e.into_inner());
        builds.entry(version_dir)
            .or_default()
            .entry(file_version.clone())
            .or_insert_with(|| SnapshotBuild {
                file_version,
                timestamp_millis: timestamp_millis(timestamp),
                paths: vec![],
            })
            .paths.push(item.path().to_string());
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use bytes::Bytes;
    use rstest::*;

    use crate::proxy::hosted::HostedRepository;
    use crate::proxy::repository::RepositoryCore;
    use crate::storage::transient_local_storage::TransientLocalStorage;
    use crate::tasks::params::REPOSITORY_OR_GROUP_ID;

    use super::*;

    const DIR: &str = "/org/x/a/1.0-SNAPSHOT";
    const BUILDS: [&str; 3] = ["1.0-20200101.000000-1", "1.0-20200102.000000-2", "1.0-20200103.000000-3"];

    async fn registry(with_release: bool) -> RepositoryRegistry {
        let repo = HostedRepository::new(RepositoryCore::new("snapshots", "snapshots", Arc::new(TransientLocalStorage::new())));
        let ctx = RequestContext::open();
        for build in BUILDS {
            repo.store(&format!("{}/a-{}.jar", DIR, build), Bytes::from_static(b"jar"), &ctx).await.unwrap();
            repo.store(&format!("{}/a-{}.jar.sha1", DIR, build), Bytes::from_static(b"sha1"), &ctx).await.unwrap();
        }
        repo.store(&format!("{}/maven-metadata.xml", DIR), Bytes::from_static(b"<metadata/>"), &ctx).await.unwrap();
        if with_release {
            repo.store("/org/x/a/1.0/a-1.0.jar", Bytes::from_static(b"jar"), &ctx).await.unwrap();
        }

        let registry = RepositoryRegistry::new();
        registry.register(Arc::new(repo)).unwrap();
        registry
    }

    async fn remaining(registry: &RepositoryRegistry) -> Vec<String> {
        let repo = registry.get("snapshots").unwrap();
        repo.list(DIR, &RequestContext::open()).await.unwrap()
            .iter()
            .map(|i| i.name().to_string())
            .collect()
    }

    #[rstest]
    #[case::epoch("19700101.000000", Some(0))]
    #[case::regular("20080815.231708", Some(1_218_842_228_000))]
    #[case::leap_day("20200229.120000", Some(1_582_977_600_000))]
    #[case::short_date("2008081.231708", None)]
    #[case::month_13("20081315.231708", None)]
    #[case::february_30("20090230.000000", None)]
    #[case::hour_99("20080815.991708", None)]
    #[case::before_epoch("19691231.235959", None)]
    fn test_timestamp_millis(#[case] timestamp: &str, #[case] expected: Option<u64>) {
        assert_eq!(timestamp_millis(timestamp), expected);
    }

    #[tokio::test]
    async fn test_impossible_timestamps_are_never_too_old() {
        let repo = HostedRepository::new(RepositoryCore::new("snapshots", "snapshots", Arc::new(TransientLocalStorage::new())));
        let ctx = RequestContext::open();
        for build in ["1.0-20081315.231708-1", "1.0-20200103.000000-2"] {
            repo.store(&format!("{}/a-{}.jar", DIR, build), Bytes::from_static(b"jar"), &ctx).await.unwrap();
        }
        let registry = RepositoryRegistry::new();
        registry.register(Arc::new(repo)).unwrap();

        let params = TaskParameters::new()
            .with(REPOSITORY_OR_GROUP_ID, "snapshots")
            .with(MIN_SNAPSHOTS_TO_KEEP, "0")
            .with(REMOVE_OLDER_THAN_DAYS, "1");
        let removed = SnapshotRemoverTask::from_parameters(&params, &registry).unwrap()
            .run(&registry).await.unwrap();

        assert_eq!(removed.len(), 1);
        assert_eq!(remaining(&registry).await, vec!["a-1.0-20081315.231708-1.jar"]);
    }

    #[rstest]
    #[case::keep_two("2", None, false, false, vec!["a-1.0-20200102.000000-2.jar", "a-1.0-20200102.000000-2.jar.sha1", "a-1.0-20200103.000000-3.jar", "a-1.0-20200103.000000-3.jar.sha1", "maven-metadata.xml"])]
    #[case::too_young("0", Some("36500"), false, false, vec!["a-1.0-20200101.000000-1.jar", "a-1.0-20200101.000000-1.jar.sha1", "a-1.0-20200102.000000-2.jar", "a-1.0-20200102.000000-2.jar.sha1", "a-1.0-20200103.000000-3.jar", "a-1.0-20200103.000000-3.jar.sha1", "maven-metadata.xml"])]
    #[case::release_exists("2", None, true, true, vec!["maven-metadata.xml"])]
    #[case::release_ignored("2", None, true, false, vec!["a-1.0-20200102.000000-2.jar", "a-1.0-20200102.000000-2.jar.sha1", "a-1.0-20200103.000000-3.jar", "a-1.0-20200103.000000-3.jar.sha1", "maven-metadata.xml"])]
    #[tokio::test]
    async fn test_remove_snapshots(#[case] min_to_keep: &str, #[case] older_than_days: Option<&str>, #[case] with_release: bool, #[case] remove_if_release_exists: bool, #[case] expected: Vec<&str>) {
        let registry = registry(with_release).await;

        let mut params = TaskParameters::new()
            .with(REPOSITORY_OR_GROUP_ID, "snapshots")
            .with(MIN_SNAPSHOTS_TO_KEEP, min_to_keep)
            .with(REMOVE_IF_RELEASE_EXISTS, remove_if_release_exists);
        if let Some(days) = older_than_days {
            params = params.with(REMOVE_OLDER_THAN_DAYS, days);
        }
        let task = SnapshotRemoverTask::from_parameters(&params, &registry).unwrap();
        let removed = task.run(&registry).await.unwrap();

        let remaining = remaining(&registry).await;
        assert_eq!(remaining, expected);
        assert_eq!(removed.len(), 7 - expected.len());
    }
}
