//! Maintenance jobs over a set of repositories. Most of them are walker based, and all of them
//!  take their parameters as a string map the way a scheduler would hand them over.

pub mod evict_unused;
pub mod expire_cache;
pub mod params;
pub mod reindex;
pub mod snapshot_remover;

use async_trait::async_trait;

use crate::error::ProxyResult;
use crate::proxy::registry::RepositoryRegistry;

#[async_trait]
pub trait Task: Send + Sync {
    type Output: Send;

    fn name(&self) -> &str;

    async fn run(&self, registry: &RepositoryRegistry) -> ProxyResult<Self::Output>;
}
