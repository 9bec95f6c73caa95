use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;

use tracing::debug;

use crate::error::{ProxyError, ProxyResult};
use crate::proxy::registry::RepositoryRegistry;
use crate::proxy::repository::{Facet, Repository};

pub const REPOSITORY_OR_GROUP_ID: &str = "repositoryOrGroupId";
pub const EVICT_OLDER_THAN_DAYS: &str = "evictOlderThanDays";
pub const RESOURCE_STORE_PATH: &str = "resourceStorePath";
pub const MIN_SNAPSHOTS_TO_KEEP: &str = "minSnapshotsToKeep";
pub const REMOVE_OLDER_THAN_DAYS: &str = "removeOlderThanDays";
pub const REMOVE_IF_RELEASE_EXISTS: &str = "removeIfReleaseExists";

pub const ALL_REPOSITORIES: &str = "all";

/// Task parameters as handed over by a scheduler
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskParameters(BTreeMap<String, String>);

impl TaskParameters {
    pub fn new() -> TaskParameters {
        Default::default()
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> TaskParameters {
        self.0.insert(key.to_string(), value.to_string());
        self
    }

    /// empty values count as absent
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn parse<T: FromStr>(&self, key: &str) -> ProxyResult<Option<T>> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw.parse::<T>()
                .map(Some)
                .map_err(|_| ProxyError::InvalidArgument(format!("invalid value for task parameter {}: {:?}", key, raw))),
        }
    }

    pub fn parse_or<T: FromStr>(&self, key: &str, default: T) -> ProxyResult<T> {
        Ok(self.parse(key)?.unwrap_or(default))
    }
}

impl FromIterator<(String, String)> for TaskParameters {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        TaskParameters(iter.into_iter().collect())
    }
}

/// The repositories a task works on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskScope {
    Repository(String),
    /// a group and everything it contains, transitively
    Group(String),
    All,
}

impl TaskScope {
    /// The id is looked up in the registry to tell repositories and groups apart
    pub fn from_parameters(params: &TaskParameters, registry: &RepositoryRegistry) -> ProxyResult<TaskScope> {
        match params.get(REPOSITORY_OR_GROUP_ID) {
            None | Some(ALL_REPOSITORIES) => Ok(TaskScope::All),
            Some(id) => {
                let repository = registry.get(id)?;
                if repository.has_facet(Facet::Group) {
                    Ok(TaskScope::Group(id.to_string()))
                }
                else {
                    Ok(TaskScope::Repository(id.to_string()))
                }
            }
        }
    }

    /// The repositories in scope, each once. A group scope includes the group itself.
    pub fn resolve(&self, registry: &RepositoryRegistry) -> ProxyResult<Vec<Arc<dyn Repository>>> {
        match self {
            TaskScope::All => Ok(registry.repositories()),
            TaskScope::Repository(id) => Ok(vec![registry.get(id)?]),
            TaskScope::Group(id) => {
                let group = registry.get_with_facet(id, Facet::Group)?;
                let mut visited = HashSet::new();
                let mut result = vec![];
                collect_transitively(registry, group, &mut visited, &mut result);
                Ok(result)
            }
        }
    }
}

fn collect_transitively(registry: &RepositoryRegistry, repository: Arc<dyn Repository>, visited: &mut HashSet<String>, result: &mut Vec<Arc<dyn Repository>>) {
    if !visited.insert(repository.id().to_string()) {
        return;
    }
    let members = repository.as_group().map(|g| g.members());
    result.push(repository);

    for member_id in members.iter().flat_map(|m| m.iter()) {
        match registry.get(member_id) {
            Ok(member) => collect_transitively(registry, member, visited, result),
            Err(e) => debug!("skipping member {}: {}", member_id, e),
        }
    }
}
