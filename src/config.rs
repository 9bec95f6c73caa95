use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use tracing::info;

use crate::error::{ProxyError, ProxyResult};
use crate::proxy::access::{AccessManager, OpenAccessManager, TargetAccessManager, WildcardPermissions};
use crate::proxy::context::RequestContext;
use crate::proxy::group::GroupRepository;
use crate::proxy::hosted::HostedRepository;
use crate::proxy::mapping::{RepositoryPathRoute, RequestRouteMapper, RouteKind, ALL_GROUPS};
use crate::proxy::proxy_repository::{ProxyRepository, DEFAULT_AUTO_BLOCK_DURATION, DEFAULT_AUTO_BLOCK_FAILURES};
use crate::proxy::registry::RepositoryRegistry;
use crate::proxy::repository::{Grouping, Repository, RepositoryCore, RepositoryPolicy, WritePolicy};
use crate::proxy::router::RepositoryRouter;
use crate::proxy::shadow::ShadowRepository;
use crate::proxy::target::{Target, TargetRegistry};
use crate::proxy::update_policy::UpdatePolicy;
use crate::storage::fs_local_storage::FsLocalStorage;
use crate::storage::http_remote_storage::{ChecksumPolicy, HttpRemoteStorage};
use crate::storage::local_storage::LocalStorage;
use crate::storage::remote_storage::RemoteStorage;
use crate::storage::transient_local_storage::TransientLocalStorage;

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8081))
}

fn default_true() -> bool {
    true
}

fn default_content_class() -> String {
    "maven2".to_string()
}

fn default_route_group() -> String {
    ALL_GROUPS.to_string()
}

fn default_anonymous_permissions() -> Vec<String> {
    vec!["*:*:read".to_string()]
}

/// The TOML configuration file
#[derive(Debug, Clone, Deserialize)]
pub struct VaultConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// an `EnvFilter` directive, `RUST_LOG` takes precedence
    #[serde(default)]
    pub log_filter: Option<String>,
    /// each repository keeps its content in a subdirectory named by its id; without a root,
    ///  content is held in memory
    #[serde(default)]
    pub storage_root: Option<PathBuf>,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub enabled: bool,
    /// wildcard permissions granted to every request, e.g. `*:*:read`
    #[serde(default = "default_anonymous_permissions")]
    pub anonymous_permissions: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        SecurityConfig {
            enabled: false,
            anonymous_permissions: default_anonymous_permissions(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryConfig {
    pub id: String,
    pub name: Option<String>,
    #[serde(default = "default_true")]
    pub browseable: bool,
    #[serde(default = "default_true")]
    pub exposed: bool,
    pub not_found_cache_ttl_minutes: Option<u64>,
    #[serde(flatten)]
    pub kind: RepositoryKind,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RepositoryKind {
    Hosted {
        #[serde(default)]
        repository_policy: RepositoryPolicy,
        #[serde(default)]
        write_policy: WritePolicy,
    },
    Proxy {
        remote_url: String,
        #[serde(default)]
        repository_policy: RepositoryPolicy,
        #[serde(default)]
        checksum_policy: ChecksumPolicy,
        artifact_max_age: Option<UpdatePolicy>,
        metadata_max_age: Option<UpdatePolicy>,
        remote_timeout_secs: Option<u64>,
        auto_block_failures: Option<u32>,
        auto_block_secs: Option<u64>,
    },
    Group {
        #[serde(default)]
        members: Vec<String>,
    },
    Shadow {
        master: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    pub id: String,
    pub name: Option<String>,
    #[serde(default = "default_content_class")]
    pub content_class: String,
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouteConfig {
    pub id: String,
    /// a group id, or `*` for all groups
    #[serde(default = "default_route_group")]
    pub group: String,
    pub pattern: String,
    pub kind: RouteKind,
    #[serde(default)]
    pub repositories: Vec<String>,
}

/// Everything a running vault consists of
#[derive(Debug, Clone)]
pub struct Vault {
    pub registry: Arc<RepositoryRegistry>,
    pub targets: Arc<TargetRegistry>,
    pub mapper: Arc<RequestRouteMapper>,
    pub router: RepositoryRouter,
    pub access: Arc<dyn AccessManager>,
}

impl Vault {
    /// a fresh context for an inbound request
    pub fn request_context(&self) -> RequestContext {
        RequestContext::new(self.access.clone())
    }
}

impl VaultConfig {
    pub fn load(path: &Path) -> anyhow::Result<VaultConfig> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading configuration file {}", path.display()))?;
        Ok(Self::from_toml_str(&content)?)
    }

    pub fn from_toml_str(content: &str) -> ProxyResult<VaultConfig> {
        let config: VaultConfig = toml::from_str(content)
            .map_err(|e| ProxyError::InvalidConfiguration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> ProxyResult<()> {
        let mut ids = HashSet::new();
        for repository in &self.repositories {
            if repository.id.trim().is_empty() || repository.id.contains('/') {
                return Err(ProxyError::InvalidConfiguration(format!("invalid repository id {:?}", repository.id)));
            }
            if !ids.insert(repository.id.as_str()) {
                return Err(ProxyError::InvalidConfiguration(format!("duplicate repository id {}", repository.id)));
            }
        }

        let unknown = |kind: &str, owner: &str, id: &str| ProxyError::InvalidConfiguration(format!("{} {} refers to unknown repository {}", kind, owner, id));
        for repository in &self.repositories {
            match &repository.kind {
                RepositoryKind::Group { members } => {
                    if let Some(m) = members.iter().find(|m| !ids.contains(m.as_str())) {
                        return Err(unknown("group", &repository.id, m));
                    }
                }
                RepositoryKind::Shadow { master } if !ids.contains(master.as_str()) => {
                    return Err(unknown("shadow", &repository.id, master));
                }
                _ => {}
            }
        }
        for route in &self.routes {
            if route.group != ALL_GROUPS && !ids.contains(route.group.as_str()) {
                return Err(unknown("route", &route.id, &route.group));
            }
        }
        Ok(())
    }

    async fn local_storage(&self, id: &str) -> anyhow::Result<Arc<dyn LocalStorage>> {
        match &self.storage_root {
            Some(root) => Ok(Arc::new(FsLocalStorage::new(root.join(id)).await?)),
            None => Ok(Arc::new(TransientLocalStorage::new())),
        }
    }

    pub async fn build(&self) -> anyhow::Result<Vault> {
        self.build_with_remote_storage(None).await
    }

    /// `remote_storage` replaces the HTTP transport of all proxies if present
    pub async fn build_with_remote_storage(&self, remote_storage: Option<Arc<dyn RemoteStorage>>) -> anyhow::Result<Vault> {
        let registry = Arc::new(RepositoryRegistry::new());

        let mapper = Arc::new(RequestRouteMapper::new());
        for route in &self.routes {
            mapper.add_route(RepositoryPathRoute::new(&route.id, Some(&route.group), &route.pattern, route.kind, route.repositories.clone())?);
        }

        let targets = Arc::new(TargetRegistry::new());
        for target in &self.targets {
            targets.add_target(Target::new(&target.id, target.name.as_deref().unwrap_or(&target.id), &target.content_class, &target.patterns)?);
        }

        for config in &self.repositories {
            let mut core = RepositoryCore::new(&config.id, config.name.as_deref().unwrap_or(&config.id), self.local_storage(&config.id).await?)
                .with_browseable(config.browseable)
                .with_exposed(config.exposed);
            if let Some(minutes) = config.not_found_cache_ttl_minutes {
                core = core.with_not_found_cache_ttl(Duration::from_secs(minutes * 60));
            }

            let repository: Arc<dyn Repository> = match &config.kind {
                RepositoryKind::Hosted { repository_policy, write_policy } => Arc::new(HostedRepository::new(core)
                    .with_repository_policy(*repository_policy)
                    .with_write_policy(*write_policy)),
                RepositoryKind::Proxy {
                    remote_url, repository_policy, checksum_policy, artifact_max_age, metadata_max_age,
                    remote_timeout_secs, auto_block_failures, auto_block_secs,
                } => {
                    let remote: Arc<dyn RemoteStorage> = match &remote_storage {
                        Some(remote) => remote.clone(),
                        None => Arc::new(HttpRemoteStorage::new(*checksum_policy)),
                    };
                    let mut proxy = ProxyRepository::new(core, remote_url, remote)
                        .with_repository_policy(*repository_policy)
                        .with_auto_block(
                            auto_block_failures.unwrap_or(DEFAULT_AUTO_BLOCK_FAILURES),
                            auto_block_secs.map(Duration::from_secs).unwrap_or(DEFAULT_AUTO_BLOCK_DURATION),
                        );
                    if let Some(policy) = artifact_max_age {
                        proxy = proxy.with_artifact_max_age(*policy);
                    }
                    if let Some(policy) = metadata_max_age {
                        proxy = proxy.with_metadata_max_age(*policy);
                    }
                    if let Some(secs) = remote_timeout_secs {
                        proxy = proxy.with_remote_timeout(Duration::from_secs(*secs));
                    }
                    Arc::new(proxy)
                }
                RepositoryKind::Group { members } => {
                    let group = GroupRepository::new(core, &registry)
                        .with_route_mapper(mapper.clone());
                    group.set_members(members.clone())?;
                    Arc::new(group)
                }
                RepositoryKind::Shadow { master } => Arc::new(ShadowRepository::new(core, master, &registry)),
            };
            registry.register(repository)?;
        }

        let access: Arc<dyn AccessManager> = if self.security.enabled {
            Arc::new(TargetAccessManager::new(
                registry.clone(),
                targets.clone(),
                Arc::new(WildcardPermissions::new(&self.security.anonymous_permissions)),
            ))
        }
        else {
            Arc::new(OpenAccessManager {})
        };

        info!("configured {} repositories", self.repositories.len());
        Ok(Vault {
            router: RepositoryRouter::new(registry.clone()),
            registry,
            targets,
            mapper,
            access,
        })
    }
}
