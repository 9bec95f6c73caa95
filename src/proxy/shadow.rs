use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{ProxyError, ProxyResult};
use crate::maven::layout::{m1_to_m2, RepositoryLayout};
use crate::proxy::context::{Action, RequestContext};
use crate::proxy::registry::{RegistryEvent, RepositoryRegistry};
use crate::proxy::repository::{Facet, LayoutConverting, LocalStatus, Repository, RepositoryCore};
use crate::storage::item::StorageItem;
use crate::util::item_path;

/// Presents a Maven 2 master repository in the Maven 1 layout. Items found in the master are
///  served under the shadow's own id and the requested (Maven 1) path.
#[derive(Debug)]
pub struct ShadowRepository {
    core: RepositoryCore,
    registry: Weak<RepositoryRegistry>,
    master_id: String,
}

impl ShadowRepository {
    pub fn new(core: RepositoryCore, master_id: &str, registry: &Arc<RepositoryRegistry>) -> ShadowRepository {
        ShadowRepository {
            core: core.with_content_class(RepositoryLayout::Maven1.content_class()),
            registry: Arc::downgrade(registry),
            master_id: master_id.to_string(),
        }
    }

    fn master(&self) -> ProxyResult<Arc<dyn Repository>> {
        self.registry.upgrade()
            .ok_or_else(|| ProxyError::NoSuchRepository { id: self.master_id.clone() })?
            .get(&self.master_id)
    }
}

#[async_trait]
impl Repository for ShadowRepository {
    fn core(&self) -> &RepositoryCore {
        &self.core
    }

    fn facets(&self) -> &[Facet] {
        &[Facet::Shadow]
    }

    async fn retrieve(&self, path: &str, ctx: &RequestContext) -> ProxyResult<StorageItem> {
        self.core.check_service()?;
        ctx.visit(&self.core.id);
        self.core.check_access(ctx, path, Action::Read)?;

        if let Some(item) = self.core.retrieve_local(path).await? {
            return Ok(item);
        }

        let Some(master_path) = self.to_master_path(path) else {
            debug!("{}: {} has no counterpart in {}", self.core.id, path, self.master_id);
            return Err(self.core.not_found(path));
        };

        let master = self.master().map_err(|_| self.core.not_found(path))?;
        if !ctx.visit(master.id()) {
            return Err(self.core.not_found(path));
        }

        let item = master.retrieve(&master_path, ctx).await
            .map_err(|e| if e.is_not_found() { self.core.not_found(path) } else { e })?;
        Ok(item.with_uid(self.core.uid(path)))
    }

    async fn list(&self, path: &str, ctx: &RequestContext) -> ProxyResult<Vec<StorageItem>> {
        self.core.check_service()?;
        ctx.visit(&self.core.id);
        self.core.check_access(ctx, path, Action::Read)?;

        let items = self.core.list_local(path).await?
            .ok_or_else(|| self.core.not_found(path))?;
        Ok(self.core.filter_readable(ctx, items))
    }

    fn as_layout_converting(&self) -> Option<&dyn LayoutConverting> {
        Some(self)
    }

    fn on_registry_event(&self, event: &RegistryEvent) {
        if let RegistryEvent::Unregistered { id } = event {
            if id == &self.master_id {
                warn!("{}: master repository {} was removed, putting the shadow out of service", self.core.id, id);
                self.core.set_local_status(LocalStatus::OutOfService);
            }
        }
    }
}

impl LayoutConverting for ShadowRepository {
    fn master_id(&self) -> &str {
        &self.master_id
    }

    fn layout(&self) -> RepositoryLayout {
        RepositoryLayout::Maven1
    }

    fn to_master_path(&self, path: &str) -> Option<String> {
        m1_to_m2(path).map(|p| item_path::normalize(&p))
    }
}
