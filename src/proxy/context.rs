use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use crate::proxy::access::{AccessManager, OpenAccessManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Action {
    Read,
    Create,
    Update,
    Delete,
}

impl Display for Action {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Action::Read => "read",
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
        })
    }
}

/// State of a single inbound request, created at the entry point and threaded through group
///  fan-out. `visited_repository_ids` is the cycle guard for group membership graphs.
#[derive(Debug)]
pub struct RequestContext {
    pub request_id: Uuid,
    visited_repository_ids: Mutex<BTreeSet<String>>,
    /// only what is already held locally, no remote fetches
    pub local_only: bool,
    /// bypass local copies of proxied items
    pub remote_only: bool,
    pub deadline: Option<Instant>,
    pub access: Arc<dyn AccessManager>,
}

impl RequestContext {
    pub fn new(access: Arc<dyn AccessManager>) -> RequestContext {
        RequestContext {
            request_id: Uuid::new_v4(),
            visited_repository_ids: Mutex::new(BTreeSet::new()),
            local_only: false,
            remote_only: false,
            deadline: None,
            access,
        }
    }

    /// a context that permits everything, for internal callers
    pub fn open() -> RequestContext {
        RequestContext::new(Arc::new(OpenAccessManager {}))
    }

    pub fn with_local_only(mut self, local_only: bool) -> RequestContext {
        self.local_only = local_only;
        self
    }

    pub fn with_remote_only(mut self, remote_only: bool) -> RequestContext {
        self.remote_only = remote_only;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> RequestContext {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Same request identity and flags, but an empty visited set: for callers that issue several
    ///  independent operations on behalf of one request (e.g. a walker listing one collection
    ///  after the other).
    pub fn for_new_operation(&self) -> RequestContext {
        RequestContext {
            request_id: self.request_id,
            visited_repository_ids: Mutex::new(BTreeSet::new()),
            local_only: self.local_only,
            remote_only: self.remote_only,
            deadline: self.deadline,
            access: self.access.clone(),
        }
    }

    /// Records a repository as visited; false if it was visited before during this request
    pub fn visit(&self, repository_id: &str) -> bool {
        let mut visited = self.visited_repository_ids.lock().unwrap_or_else(|e| e.into_inner());
        visited.insert(repository_id.to_string())
    }

    pub fn has_visited(&self, repository_id: &str) -> bool {
        self.visited_repository_ids.lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(repository_id)
    }

    pub fn visited_repository_ids(&self) -> Vec<String> {
        self.visited_repository_ids.lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}
