use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use hex::FromHex;
use thiserror::Error;
use tracing::trace;

use crate::storage::item::{read_all, BlobStream};
use crate::util::validating_stream::{sha1_hex, Sha1StreamVerifier, StreamVerifier, ValidatingStream, VerificationError};

/// Why a remote could not deliver. These never reach callers of a repository: a proxy logs them
///  and reports the item as not found.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("{url} not found on remote")]
    NotFound { url: String },
    #[error("transport failure for {url}: {message}")]
    Transport { url: String, message: String },
    #[error("content verification failed for {url}: {message}")]
    Verification { url: String, message: String },
    #[error("remote for {url} is auto-blocked")]
    Blocked { url: String },
    #[error("timed out fetching {url}")]
    Timeout { url: String },
}

impl RemoteError {
    /// the failures that count towards auto-blocking a remote
    pub fn is_transport(&self) -> bool {
        matches!(self, RemoteError::Transport { .. } | RemoteError::Timeout { .. })
    }

    /// classifies an error that surfaced while draining a content stream
    pub fn from_stream_error(url: &str, e: anyhow::Error) -> RemoteError {
        match e.downcast_ref::<VerificationError>() {
            Some(v) => RemoteError::Verification { url: url.to_string(), message: v.0.clone() },
            None => RemoteError::Transport { url: url.to_string(), message: format!("{:#}", e) },
        }
    }
}

pub struct RemoteContent {
    pub url: String,
    pub stream: BlobStream,
    pub length: Option<u64>,
    /// checksums as declared by the remote, hex encoded
    pub sha1: Option<String>,
    pub md5: Option<String>,
}

impl RemoteContent {
    /// drains the (verifying) stream; any failure means the content must not be used
    pub async fn into_bytes(self) -> Result<Bytes, RemoteError> {
        let url = self.url;
        read_all(self.stream).await
            .map_err(|e| RemoteError::from_stream_error(&url, e))
    }
}

/// The transport behind a proxy repository
#[async_trait]
pub trait RemoteStorage: Debug + Send + Sync {
    async fn fetch(&self, base_url: &str, path: &str) -> Result<RemoteContent, RemoteError>;
}

pub fn remote_url(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    Transport,
    /// the content is served, but with a declared checksum that does not match
    Corrupt,
}

/// Remote storage backed by a map of URLs, with optional latency and per-URL failures - for tests
#[derive(Debug, Default)]
pub struct InMemoryRemoteStorage {
    files: RwLock<HashMap<String, Bytes>>,
    failures: RwLock<HashMap<String, InjectedFailure>>,
    latency: Option<Duration>,
    fetch_count: AtomicUsize,
}

impl InMemoryRemoteStorage {
    pub fn new() -> InMemoryRemoteStorage {
        Default::default()
    }

    pub fn with_latency(latency: Duration) -> InMemoryRemoteStorage {
        InMemoryRemoteStorage {
            latency: Some(latency),
            ..Default::default()
        }
    }

    pub fn put(&self, base_url: &str, path: &str, data: impl Into<Bytes>) {
        if let Ok(mut files) = self.files.write() {
            files.insert(remote_url(base_url, path), data.into());
        }
    }

    pub fn remove(&self, base_url: &str, path: &str) {
        if let Ok(mut files) = self.files.write() {
            files.remove(&remote_url(base_url, path));
        }
    }

    pub fn fail(&self, base_url: &str, path: &str, failure: InjectedFailure) {
        if let Ok(mut failures) = self.failures.write() {
            failures.insert(remote_url(base_url, path), failure);
        }
    }

    pub fn heal(&self, base_url: &str, path: &str) {
        if let Ok(mut failures) = self.failures.write() {
            failures.remove(&remote_url(base_url, path));
        }
    }

    /// the number of `fetch` calls that reached this storage
    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteStorage for InMemoryRemoteStorage {
    async fn fetch(&self, base_url: &str, path: &str) -> Result<RemoteContent, RemoteError> {
        let url = remote_url(base_url, path);
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        trace!("in-memory fetch of {}", url);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let failure = self.failures.read().ok().and_then(|f| f.get(&url).copied());
        if failure == Some(InjectedFailure::Transport) {
            return Err(RemoteError::Transport { url, message: "injected failure".to_string() });
        }

        let data = self.files.read().ok()
            .and_then(|f| f.get(&url).cloned())
            .ok_or_else(|| RemoteError::NotFound { url: url.clone() })?;

        let declared_sha1 = match failure {
            Some(InjectedFailure::Corrupt) => sha1_hex(b"something else"),
            _ => sha1_hex(&data),
        };
        let expected = <[u8; 20]>::from_hex(&declared_sha1)
            .map_err(|e| RemoteError::Transport { url: url.clone(), message: e.to_string() })?;
        let verifiers: Vec<Box<dyn StreamVerifier>> = vec![Box::new(Sha1StreamVerifier::new(expected))];

        let length = data.len() as u64;
        let inner: BlobStream = Box::pin(futures::stream::once(async move { Ok::<_, anyhow::Error>(data) }));

        Ok(RemoteContent {
            url,
            stream: Box::pin(ValidatingStream::new(inner, verifiers)),
            length: Some(length),
            sha1: Some(declared_sha1),
            md5: None,
        })
    }
}
