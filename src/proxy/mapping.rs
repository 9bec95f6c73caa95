use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{ProxyError, ProxyResult};

pub const ALL_REPOSITORIES: &str = "*";
pub const ALL_GROUPS: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteKind {
    /// requests for matching paths are not answered by any member
    Blocking,
    /// only the listed members are consulted
    Inclusion,
    /// the listed members are skipped
    Exclusion,
}

/// A rule restricting which members of a group are asked for a path
#[derive(Debug)]
pub struct RepositoryPathRoute {
    pub id: String,
    /// `None` applies the route to every group
    pub group_id: Option<String>,
    pub kind: RouteKind,
    pub repository_ids: Vec<String>,
    pattern: Regex,
}

impl RepositoryPathRoute {
    pub fn new(id: &str, group_id: Option<&str>, pattern: &str, kind: RouteKind, repository_ids: Vec<String>) -> ProxyResult<RepositoryPathRoute> {
        let pattern = Regex::new(pattern)
            .map_err(|e| ProxyError::InvalidConfiguration(format!("route {}: invalid pattern {:?}: {}", id, pattern, e)))?;

        Ok(RepositoryPathRoute {
            id: id.to_string(),
            group_id: group_id
                .filter(|g| *g != ALL_GROUPS)
                .map(|g| g.to_string()),
            kind,
            repository_ids,
            pattern,
        })
    }

    pub fn applies_to(&self, group_id: &str, path: &str) -> bool {
        self.group_id.as_deref().map_or(true, |g| g == group_id)
            && self.pattern.is_match(path)
    }

    fn names_all(&self) -> bool {
        self.repository_ids.iter().any(|r| r == ALL_REPOSITORIES)
    }

    fn names(&self, repository_id: &str) -> bool {
        self.names_all() || self.repository_ids.iter().any(|r| r == repository_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappedMembers {
    Blocked,
    Members(Vec<String>),
}

/// Applies path routes to a group's membership before fan-out
#[derive(Debug, Default)]
pub struct RequestRouteMapper {
    routes: RwLock<Arc<BTreeMap<String, Arc<RepositoryPathRoute>>>>,
}

impl RequestRouteMapper {
    pub fn new() -> RequestRouteMapper {
        Default::default()
    }

    fn snapshot(&self) -> Arc<BTreeMap<String, Arc<RepositoryPathRoute>>> {
        self.routes.read()
            .map(|r| r.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    pub fn add_route(&self, route: RepositoryPathRoute) {
        let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());
        let mut updated = (**routes).clone();
        updated.insert(route.id.clone(), Arc::new(route));
        *routes = Arc::new(updated);
    }

    pub fn remove_route(&self, id: &str) -> bool {
        let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());
        if !routes.contains_key(id) {
            return false;
        }
        let mut updated = (**routes).clone();
        updated.remove(id);
        *routes = Arc::new(updated);
        true
    }

    /// Blocking routes win. Otherwise inclusion routes narrow the members to those they name,
    ///  then exclusion routes remove the members they name. Declared member order is kept.
    pub fn map(&self, group_id: &str, path: &str, members: &[String]) -> MappedMembers {
        let routes = self.snapshot();
        let applicable: Vec<&Arc<RepositoryPathRoute>> = routes.values()
            .filter(|r| r.applies_to(group_id, path))
            .collect();

        if applicable.is_empty() {
            return MappedMembers::Members(members.to_vec());
        }

        if let Some(blocking) = applicable.iter().find(|r| r.kind == RouteKind::Blocking) {
            info!("{}:{} blocked by route {}", group_id, path, blocking.id);
            return MappedMembers::Blocked;
        }

        let inclusions: Vec<_> = applicable.iter().filter(|r| r.kind == RouteKind::Inclusion).collect();
        let exclusions: Vec<_> = applicable.iter().filter(|r| r.kind == RouteKind::Exclusion).collect();

        let mapped: Vec<String> = members.iter()
            .filter(|m| inclusions.is_empty() || inclusions.iter().any(|r| r.names(m)))
            .filter(|m| !exclusions.iter().any(|r| r.names(m)))
            .cloned()
            .collect();

        debug!("{}:{} mapped to members {:?}", group_id, path, mapped);
        MappedMembers::Members(mapped)
    }
}
