use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Debug;
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use crate::error::{ProxyError, ProxyResult};
use crate::proxy::repository::{Facet, Repository};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Registered { id: String },
    Unregistered { id: String },
}

impl RegistryEvent {
    pub fn repository_id(&self) -> &str {
        match self {
            RegistryEvent::Registered { id } => id,
            RegistryEvent::Unregistered { id } => id,
        }
    }
}

/// Explicit listener for registry changes. Registered repositories are notified anyway.
pub trait RegistrySubscriber: Debug + Send + Sync {
    fn on_registry_event(&self, event: &RegistryEvent);
}

type RepositoryMap = BTreeMap<String, Arc<dyn Repository>>;

/// All repositories by id. Readers work on an immutable snapshot of the map, so a lookup never
///  sees a half-applied change. The reverse index from member to containing groups is updated
///  whenever a group's membership changes.
#[derive(Debug, Default)]
pub struct RepositoryRegistry {
    repositories: RwLock<Arc<RepositoryMap>>,
    groups_of: RwLock<HashMap<String, BTreeSet<String>>>,
    subscribers: RwLock<Vec<Arc<dyn RegistrySubscriber>>>,
}

impl RepositoryRegistry {
    pub fn new() -> RepositoryRegistry {
        Default::default()
    }

    fn snapshot(&self) -> Arc<RepositoryMap> {
        self.repositories.read()
            .map(|r| r.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    pub fn register(&self, repository: Arc<dyn Repository>) -> ProxyResult<()> {
        let id = repository.id().to_string();
        {
            let mut repositories = self.repositories.write().unwrap_or_else(|e| e.into_inner());
            if repositories.contains_key(&id) {
                return Err(ProxyError::InvalidArgument(format!("repository {} is already registered", id)));
            }
            let mut updated = (**repositories).clone();
            updated.insert(id.clone(), repository.clone());
            *repositories = Arc::new(updated);
        }

        if let Some(group) = repository.as_group() {
            self.index_members(&id, &group.members());
        }

        info!("registered repository {} ({:?})", id, repository.facets());
        self.publish(RegistryEvent::Registered { id });
        Ok(())
    }

    /// Removes a repository; every group containing it prunes it from its membership when the
    ///  resulting event is published.
    pub fn unregister(&self, id: &str) -> ProxyResult<Arc<dyn Repository>> {
        let removed = {
            let mut repositories = self.repositories.write().unwrap_or_else(|e| e.into_inner());
            if !repositories.contains_key(id) {
                return Err(ProxyError::NoSuchRepository { id: id.to_string() });
            }
            let mut updated = (**repositories).clone();
            let removed = updated.remove(id);
            *repositories = Arc::new(updated);
            removed
        };

        {
            let mut groups_of = self.groups_of.write().unwrap_or_else(|e| e.into_inner());
            for groups in groups_of.values_mut() {
                groups.remove(id);
            }
            groups_of.retain(|_, groups| !groups.is_empty());
        }

        info!("unregistered repository {}", id);
        self.publish(RegistryEvent::Unregistered { id: id.to_string() });
        removed.ok_or_else(|| ProxyError::NoSuchRepository { id: id.to_string() })
    }

    pub fn get(&self, id: &str) -> ProxyResult<Arc<dyn Repository>> {
        self.snapshot().get(id)
            .cloned()
            .ok_or_else(|| ProxyError::NoSuchRepository { id: id.to_string() })
    }

    pub fn get_with_facet(&self, id: &str, facet: Facet) -> ProxyResult<Arc<dyn Repository>> {
        let repository = self.get(id)?;
        if repository.has_facet(facet) {
            Ok(repository)
        }
        else {
            Err(ProxyError::MissingFacet { id: id.to_string(), facet })
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.snapshot().contains_key(id)
    }

    /// all repositories, ordered by id
    pub fn repositories(&self) -> Vec<Arc<dyn Repository>> {
        self.snapshot().values().cloned().collect()
    }

    pub fn repositories_with_facet(&self, facet: Facet) -> Vec<Arc<dyn Repository>> {
        self.snapshot().values()
            .filter(|r| r.has_facet(facet))
            .cloned()
            .collect()
    }

    /// the groups listing `id` as a direct member
    pub fn groups_containing(&self, id: &str) -> Vec<String> {
        self.groups_of.read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .map(|groups| groups.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn subscribe(&self, subscriber: Arc<dyn RegistrySubscriber>) {
        self.subscribers.write()
            .unwrap_or_else(|e| e.into_inner())
            .push(subscriber);
    }

    /// Re-reads the membership of a registered group into the reverse index
    pub fn membership_changed(&self, group_id: &str) {
        let members = match self.get(group_id) {
            Ok(repository) => match repository.as_group() {
                Some(group) => group.members(),
                None => return,
            },
            Err(_) => return,
        };
        self.index_members(group_id, &members);
    }

    fn index_members(&self, group_id: &str, members: &[String]) {
        debug!("indexing members of group {}: {:?}", group_id, members);
        let mut groups_of = self.groups_of.write().unwrap_or_else(|e| e.into_inner());
        for groups in groups_of.values_mut() {
            groups.remove(group_id);
        }
        for member in members {
            groups_of.entry(member.clone())
                .or_default()
                .insert(group_id.to_string());
        }
        groups_of.retain(|_, groups| !groups.is_empty());
    }

    fn publish(&self, event: RegistryEvent) {
        let repositories = self.snapshot();
        for repository in repositories.values() {
            repository.on_registry_event(&event);
        }

        let subscribers: Vec<Arc<dyn RegistrySubscriber>> = self.subscribers.read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for subscriber in subscribers {
            subscriber.on_registry_event(&event);
        }
    }
}
