use thiserror::Error;

use crate::proxy::context::Action;
use crate::proxy::repository::Facet;
use crate::storage::item::RepositoryItemUid;

/// Outcome kinds of repository operations as seen by callers.
///
/// `ItemNotFound` and `AccessDenied` have the same final effect for a client (the path yields
///  nothing), but they stay distinct so that logging and the HTTP binding can tell them apart.
///  Remote transport failures never show up here: a proxy downgrades them to `ItemNotFound`.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("item not found: {uid}")]
    ItemNotFound { uid: RepositoryItemUid },

    #[error("access denied: {action} on {uid}")]
    AccessDenied { uid: RepositoryItemUid, action: Action },

    #[error("illegal operation on repository {repository_id}: {reason}")]
    IllegalOperation { repository_id: String, reason: String },

    #[error("repository {repository_id} is out of service")]
    RepositoryNotAvailable { repository_id: String },

    #[error("no such repository: {id}")]
    NoSuchRepository { id: String },

    #[error("repository {id} does not have facet {facet:?}")]
    MissingFacet { id: String, facet: Facet },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("storage failure: {0:#}")]
    Storage(#[from] anyhow::Error),
}

pub type ProxyResult<T> = Result<T, ProxyError>;

impl ProxyError {
    pub fn not_found(repository_id: &str, path: &str) -> ProxyError {
        ProxyError::ItemNotFound { uid: RepositoryItemUid::new(repository_id, path) }
    }

    pub fn illegal_operation(repository_id: &str, reason: impl Into<String>) -> ProxyError {
        ProxyError::IllegalOperation {
            repository_id: repository_id.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ProxyError::ItemNotFound { .. } | ProxyError::NoSuchRepository { .. })
    }

    /// true for outcomes that a group treats as "this member contributes nothing"
    pub fn is_member_miss(&self) -> bool {
        matches!(
            self,
            ProxyError::ItemNotFound { .. }
                | ProxyError::AccessDenied { .. }
                | ProxyError::IllegalOperation { .. }
                | ProxyError::RepositoryNotAvailable { .. }
                | ProxyError::Storage(_)
        )
    }
}
