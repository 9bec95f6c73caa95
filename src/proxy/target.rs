use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use regex::Regex;

use crate::error::{ProxyError, ProxyResult};
use crate::proxy::context::Action;

pub const ANY_CONTENT_CLASS: &str = "any";

/// A named, pattern based scope of paths, the unit of access control
#[derive(Debug)]
pub struct Target {
    pub id: String,
    pub name: String,
    pub content_class: String,
    patterns: Vec<Regex>,
}

impl Target {
    /// patterns must match the whole item path, e.g. `/org/acme/.*`
    pub fn new(id: &str, name: &str, content_class: &str, patterns: &[String]) -> ProxyResult<Target> {
        let patterns = patterns.iter()
            .map(|p| Regex::new(&format!("^(?:{})$", p))
                .map_err(|e| ProxyError::InvalidConfiguration(format!("target {}: invalid pattern {:?}: {}", id, p, e))))
            .collect::<ProxyResult<Vec<_>>>()?;

        Ok(Target {
            id: id.to_string(),
            name: name.to_string(),
            content_class: content_class.to_string(),
            patterns,
        })
    }

    pub fn applies_to(&self, content_class: &str) -> bool {
        self.content_class == ANY_CONTENT_CLASS || self.content_class == content_class
    }

    pub fn is_path_contained(&self, content_class: &str, path: &str) -> bool {
        self.applies_to(content_class) && self.patterns.iter().any(|p| p.is_match(path))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TargetMatch {
    pub target_id: String,
    pub repository_id: String,
}

/// The targets matching one path, built fresh for every authorization check
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetSet {
    matches: Vec<TargetMatch>,
}

impl TargetSet {
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn matches(&self) -> &[TargetMatch] {
        &self.matches
    }

    pub fn add(&mut self, target_match: TargetMatch) {
        if !self.matches.contains(&target_match) {
            self.matches.push(target_match);
        }
    }

    pub fn add_all(&mut self, other: TargetSet) {
        for m in other.matches {
            self.add(m);
        }
    }

    /// `target-id:repository-id:action` for every match
    pub fn permission_strings(&self, action: Action) -> Vec<String> {
        self.matches.iter()
            .map(|m| format!("{}:{}:{}", m.target_id, m.repository_id, action))
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct TargetRegistry {
    targets: RwLock<Arc<BTreeMap<String, Arc<Target>>>>,
}

impl TargetRegistry {
    pub fn new() -> TargetRegistry {
        Default::default()
    }

    fn snapshot(&self) -> Arc<BTreeMap<String, Arc<Target>>> {
        self.targets.read()
            .map(|t| t.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    pub fn add_target(&self, target: Target) {
        let mut targets = self.targets.write().unwrap_or_else(|e| e.into_inner());
        let mut updated = (**targets).clone();
        updated.insert(target.id.clone(), Arc::new(target));
        *targets = Arc::new(updated);
    }

    pub fn remove_target(&self, id: &str) -> bool {
        let mut targets = self.targets.write().unwrap_or_else(|e| e.into_inner());
        if !targets.contains_key(id) {
            return false;
        }
        let mut updated = (**targets).clone();
        updated.remove(id);
        *targets = Arc::new(updated);
        true
    }

    pub fn get(&self, id: &str) -> Option<Arc<Target>> {
        self.snapshot().get(id).cloned()
    }

    pub fn targets_for_repository_path(&self, repository_id: &str, content_class: &str, path: &str) -> TargetSet {
        let mut result = TargetSet::default();
        for target in self.snapshot().values() {
            if target.is_path_contained(content_class, path) {
                result.add(TargetMatch {
                    target_id: target.id.clone(),
                    repository_id: repository_id.to_string(),
                });
            }
        }
        result
    }

    pub fn has_any_applicable_target(&self, content_class: &str) -> bool {
        self.snapshot().values().any(|t| t.applies_to(content_class))
    }
}

#[cfg(test)]
mod test {
    use rstest::*;
    use super::*;

    fn registry() -> TargetRegistry {
        let registry = TargetRegistry::new();
        registry.add_target(Target::new("acme", "ACME", "maven2", &["/com/acme/.*".to_string()]).unwrap());
        registry.add_target(Target::new("all", "everything", ANY_CONTENT_CLASS, &[".*".to_string()]).unwrap());
        registry.add_target(Target::new("m1", "legacy", "maven1", &["/com/acme/.*".to_string()]).unwrap());
        registry
    }

    #[rstest]
    #[case("/com/acme/a/1.0/a-1.0.jar", "maven2", vec!["acme:central:read", "all:central:read"])]
    #[case("/com/acmex/a.jar", "maven2", vec!["all:central:read"])]
    #[case("/com/acme/a.jar", "maven1", vec!["all:central:read", "m1:central:read"])]
    fn test_permission_strings(#[case] path: &str, #[case] content_class: &str, #[case] expected: Vec<&str>) {
        let set = registry().targets_for_repository_path("central", content_class, path);
        assert_eq!(set.permission_strings(Action::Read), expected);
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(Target::new("x", "x", "maven2", &["(".to_string()]).is_err());
    }

    #[test]
    fn test_remove_target() {
        let registry = registry();
        assert!(registry.remove_target("all"));
        assert!(!registry.remove_target("all"));
        assert!(registry.targets_for_repository_path("central", "maven2", "/org/x").is_empty());
        assert!(registry.has_any_applicable_target("maven1"));
    }

    #[test]
    fn test_set_deduplicates() {
        let mut set = TargetSet::default();
        let m = TargetMatch { target_id: "t".to_string(), repository_id: "r".to_string() };
        set.add(m.clone());
        let mut other = TargetSet::default();
        other.add(m);
        set.add_all(other);
        assert_eq!(set.matches().len(), 1);
    }
}
