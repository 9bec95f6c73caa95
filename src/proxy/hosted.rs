use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::error::{ProxyError, ProxyResult};
use crate::maven::paths::{is_checksum_path, is_metadata_path};
use crate::proxy::context::{Action, RequestContext};
use crate::proxy::repository::{Facet, Repository, RepositoryCore, RepositoryPolicy, WritePolicy};
use crate::storage::item::{ItemAttributes, StorageItem};

/// A repository whose content is deployed to it and lives in its local storage only
#[derive(Debug)]
pub struct HostedRepository {
    core: RepositoryCore,
    repository_policy: RepositoryPolicy,
    write_policy: WritePolicy,
}

impl HostedRepository {
    pub fn new(core: RepositoryCore) -> HostedRepository {
        HostedRepository {
            core,
            repository_policy: RepositoryPolicy::Mixed,
            write_policy: WritePolicy::AllowWrite,
        }
    }

    pub fn with_repository_policy(mut self, repository_policy: RepositoryPolicy) -> HostedRepository {
        self.repository_policy = repository_policy;
        self
    }

    pub fn with_write_policy(mut self, write_policy: WritePolicy) -> HostedRepository {
        self.write_policy = write_policy;
        self
    }

    fn check_write(&self, path: &str, exists: bool) -> ProxyResult<()> {
        match self.write_policy {
            WritePolicy::ReadOnly => Err(ProxyError::illegal_operation(&self.core.id, "the repository is read-only")),
            WritePolicy::AllowWriteOnce if exists && !is_metadata_path(path) && !is_checksum_path(path) =>
                Err(ProxyError::illegal_operation(&self.core.id, format!("{} exists and cannot be redeployed", path))),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Repository for HostedRepository {
    fn core(&self) -> &RepositoryCore {
        &self.core
    }

    fn facets(&self) -> &[Facet] {
        &[Facet::Hosted]
    }

    async fn retrieve(&self, path: &str, ctx: &RequestContext) -> ProxyResult<StorageItem> {
        self.core.check_service()?;
        ctx.visit(&self.core.id);
        self.core.check_access(ctx, path, Action::Read)?;

        self.core.retrieve_local(path).await?
            .ok_or_else(|| self.core.not_found(path))
    }

    async fn list(&self, path: &str, ctx: &RequestContext) -> ProxyResult<Vec<StorageItem>> {
        self.core.check_service()?;
        ctx.visit(&self.core.id);
        self.core.check_access(ctx, path, Action::Read)?;

        let items = self.core.list_local(path).await?
            .ok_or_else(|| self.core.not_found(path))?;
        Ok(self.core.filter_readable(ctx, items))
    }

    async fn store(&self, path: &str, data: Bytes, ctx: &RequestContext) -> ProxyResult<StorageItem> {
        self.core.check_service()?;

        let existing = self.core.local_storage.retrieve(path).await?;
        if existing.as_ref().map_or(false, |e| e.is_collection()) {
            return Err(ProxyError::illegal_operation(&self.core.id, format!("{} is a collection", path)));
        }
        let action = if existing.is_some() { Action::Update } else { Action::Create };
        self.core.check_access(ctx, path, action)?;
        self.check_write(path, existing.is_some())?;

        if !self.repository_policy.accepts_path(path) {
            return Err(ProxyError::illegal_operation(
                &self.core.id,
                format!("{} does not match the repository policy {:?}", path, self.repository_policy),
            ));
        }

        debug!("{}: storing {} ({} bytes)", self.core.id, path, data.len());
        self.core.store_local(path, data, ItemAttributes::checked_now()).await
    }

    async fn delete(&self, path: &str, ctx: &RequestContext) -> ProxyResult<()> {
        self.core.check_service()?;
        self.core.check_access(ctx, path, Action::Delete)?;
        if self.write_policy == WritePolicy::ReadOnly {
            return Err(ProxyError::illegal_operation(&self.core.id, "the repository is read-only"));
        }

        if self.core.local_storage.delete(path).await? {
            debug!("{}: deleted {}", self.core.id, path);
            Ok(())
        }
        else {
            Err(self.core.not_found(path))
        }
    }
}
