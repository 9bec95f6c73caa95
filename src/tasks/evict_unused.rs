use async_trait::async_trait;
use tracing::{error, info};

use crate::error::ProxyResult;
use crate::proxy::registry::RepositoryRegistry;
use crate::proxy::repository::Facet;
use crate::storage::item::{now_millis, RepositoryItemUid};
use crate::tasks::params::{TaskParameters, TaskScope, EVICT_OLDER_THAN_DAYS};
use crate::tasks::Task;

pub const DEFAULT_EVICT_OLDER_THAN_DAYS: u32 = 30;
const MILLIS_PER_DAY: u64 = 24 * 60 * 60 * 1000;

/// Removes proxied content that was not checked against its remote for a number of days. Hosted
///  and group repositories in scope are left alone.
#[derive(Debug, Clone)]
pub struct EvictUnusedItemsTask {
    pub scope: TaskScope,
    pub evict_older_than_days: u32,
}

impl EvictUnusedItemsTask {
    pub fn from_parameters(params: &TaskParameters, registry: &RepositoryRegistry) -> ProxyResult<EvictUnusedItemsTask> {
        Ok(EvictUnusedItemsTask {
            scope: TaskScope::from_parameters(params, registry)?,
            evict_older_than_days: params.parse_or(EVICT_OLDER_THAN_DAYS, DEFAULT_EVICT_OLDER_THAN_DAYS)?,
        })
    }

    pub fn cutoff_millis(&self, now_millis: u64) -> u64 {
        now_millis.saturating_sub(self.evict_older_than_days as u64 * MILLIS_PER_DAY)
    }
}

#[async_trait]
impl Task for EvictUnusedItemsTask {
    type Output = Vec<RepositoryItemUid>;

    fn name(&self) -> &str {
        "evict unused proxied items"
    }

    async fn run(&self, registry: &RepositoryRegistry) -> ProxyResult<Vec<RepositoryItemUid>> {
        let cutoff_millis = self.cutoff_millis(now_millis());
        info!("evicting items older than {} days from {:?}", self.evict_older_than_days, self.scope);

        let mut result = vec![];
        for repository in self.scope.resolve(registry)? {
            if !repository.has_facet(Facet::Proxy) {
                continue;
            }
            match repository.evict_unused_items(cutoff_millis).await {
                Ok(paths) => result.extend(paths.iter().map(|p| RepositoryItemUid::new(repository.id(), p))),
                Err(e) => error!("eviction in {} failed: {}", repository.id(), e),
            }
        }

        info!("evicted {} items", result.len());
        Ok(result)
    }
}
