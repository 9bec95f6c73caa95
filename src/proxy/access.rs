use std::collections::BTreeSet;
use std::fmt::Debug;
use std::sync::Arc;

use tracing::debug;

use crate::proxy::context::Action;
use crate::proxy::registry::RepositoryRegistry;
use crate::proxy::target::TargetRegistry;

/// Decides whether the current request may perform `action` on a path of a repository
pub trait AccessManager: Debug + Send + Sync {
    fn is_permitted(&self, repository_id: &str, content_class: &str, path: &str, action: Action) -> bool;
}

#[derive(Debug, Clone)]
pub struct OpenAccessManager {}

impl AccessManager for OpenAccessManager {
    fn is_permitted(&self, _repository_id: &str, _content_class: &str, _path: &str, _action: Action) -> bool {
        true
    }
}

/// The permission engine: true if any of the permission strings is granted
pub trait PermissionChecker: Debug + Send + Sync {
    fn is_permitted(&self, permissions: &[String]) -> bool;
}

/// Grants permissions by `:`-separated patterns where `*` matches any single segment,
///  e.g. `*:*:read` or `acme:releases:*`
#[derive(Debug, Clone, Default)]
pub struct WildcardPermissions {
    granted: Vec<Vec<String>>,
}

impl WildcardPermissions {
    pub fn new(granted: &[String]) -> WildcardPermissions {
        WildcardPermissions {
            granted: granted.iter()
                .map(|g| g.split(':').map(|s| s.trim().to_string()).collect())
                .collect(),
        }
    }

    fn implies(pattern: &[String], permission: &str) -> bool {
        let segments: Vec<&str> = permission.split(':').collect();
        pattern.len() == segments.len()
            && pattern.iter().zip(segments.iter()).all(|(p, s)| p == "*" || p == s)
    }
}

impl PermissionChecker for WildcardPermissions {
    fn is_permitted(&self, permissions: &[String]) -> bool {
        permissions.iter()
            .any(|permission| self.granted.iter().any(|g| Self::implies(g, permission)))
    }
}

/// Target based authorization: the targets matching the path in the repository itself and in
///  every group that (transitively) contains it are turned into permission strings. A path
///  without any matching target is permitted.
#[derive(Debug)]
pub struct TargetAccessManager {
    registry: Arc<RepositoryRegistry>,
    targets: Arc<TargetRegistry>,
    checker: Arc<dyn PermissionChecker>,
}

impl TargetAccessManager {
    pub fn new(registry: Arc<RepositoryRegistry>, targets: Arc<TargetRegistry>, checker: Arc<dyn PermissionChecker>) -> TargetAccessManager {
        TargetAccessManager {
            registry,
            targets,
            checker,
        }
    }

    fn containing_groups(&self, repository_id: &str) -> BTreeSet<String> {
        let mut result = BTreeSet::new();
        let mut pending = vec![repository_id.to_string()];
        while let Some(id) = pending.pop() {
            for group_id in self.registry.groups_containing(&id) {
                if group_id != repository_id && result.insert(group_id.clone()) {
                    pending.push(group_id);
                }
            }
        }
        result
    }
}

impl AccessManager for TargetAccessManager {
    fn is_permitted(&self, repository_id: &str, content_class: &str, path: &str, action: Action) -> bool {
        let mut target_set = self.targets.targets_for_repository_path(repository_id, content_class, path);
        for group_id in self.containing_groups(repository_id) {
            target_set.add_all(self.targets.targets_for_repository_path(&group_id, content_class, path));
        }

        if target_set.is_empty() {
            return true;
        }

        let permissions = target_set.permission_strings(action);
        let permitted = self.checker.is_permitted(&permissions);
        if !permitted {
            debug!("{} on {}:{} denied, required one of {:?}", action, repository_id, path, permissions);
        }
        permitted
    }
}
