use async_trait::async_trait;
use futures::StreamExt;
use hex::FromHex;
use hyper::{Body, Client, Request, Response, StatusCode, Uri};
use hyper::body::to_bytes;
use hyper::client::HttpConnector;
use hyper::header::{HeaderMap, CONTENT_LENGTH, CONTENT_TYPE, USER_AGENT};
use hyper_tls::HttpsConnector;
use serde::Deserialize;
use tracing::{debug, trace};

use crate::storage::item::BlobStream;
use crate::storage::remote_storage::{remote_url, RemoteContent, RemoteError, RemoteStorage};
use crate::util::validating_stream::{Md5StreamVerifier, NopStreamVerifier, Sha1StreamVerifier, StreamVerifier, ValidatingStream};

pub const DEFAULT_USER_AGENT: &str = concat!("maven-vault/", env!("CARGO_PKG_VERSION"));

/// How a remote's SHA1 checksums are used to verify downloaded content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumPolicy {
    /// content without a checksum (header or `.sha1` file) is rejected
    Require,
    #[default]
    VerifyIfPresent,
    Ignore,
}

/// Fetches files over HTTP(S), checking the content against a checksum from a response header or
///  a companion `.sha1` file.
///
/// Instances do HTTP connection caching internally, so keeping them alive has performance benefits.
#[derive(Debug)]
pub struct HttpRemoteStorage {
    client: Client<HttpsConnector<HttpConnector>>,
    user_agent: String,
    checksum_policy: ChecksumPolicy,
}

impl HttpRemoteStorage {
    pub fn new(checksum_policy: ChecksumPolicy) -> HttpRemoteStorage {
        HttpRemoteStorage {
            client: Client::builder()
                .build::<_, Body>(HttpsConnector::new()),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            checksum_policy,
        }
    }

    pub fn with_user_agent(mut self, user_agent: &str) -> HttpRemoteStorage {
        self.user_agent = user_agent.to_string();
        self
    }

    async fn get(&self, url: &str) -> Result<Response<Body>, RemoteError> {
        let transport = |message: String| RemoteError::Transport { url: url.to_string(), message };

        let uri = Uri::try_from(url).map_err(|e| transport(e.to_string()))?;
        let request = Request::builder()
            .method("GET")
            .uri(uri)
            .header(USER_AGENT, &self.user_agent)
            .body(Body::empty())
            .map_err(|e| transport(e.to_string()))?;

        trace!("getting {:?}", request);

        let response = self.client.request(request)
            .await
            .map_err(|e| transport(e.to_string()))?;

        match response.status() {
            s if s.is_success() => Ok(response),
            StatusCode::NOT_FOUND | StatusCode::GONE => Err(RemoteError::NotFound { url: url.to_string() }),
            s => Err(transport(format!("upstream request failed: {}", s))),
        }
    }

    /// an HTML page for a path that is not an HTML document is the remote's directory listing
    fn is_directory_listing(path: &str, headers: &HeaderMap) -> bool {
        let is_html = headers.get(CONTENT_TYPE)
            .and_then(|h| h.to_str().ok())
            .map_or(false, |s| s.trim_start().to_ascii_lowercase().starts_with("text/html"));
        let lower = path.to_ascii_lowercase();
        is_html && !lower.ends_with(".html") && !lower.ends_with(".htm")
    }

    fn declared_sha1(headers: &HeaderMap) -> Option<String> {
        headers.get("x-checksum-sha1")
            .or_else(|| headers.get("x-goog-meta-checksum-sha1"))
            .or_else(|| headers.get("etag"))
            .and_then(|h| h.to_str().ok())
            .map(|s| s.trim_matches('"').trim_start_matches("{SHA1{").trim_end_matches("}}").to_string())
            .filter(|s| s.len() == 40)
    }

    fn declared_md5(headers: &HeaderMap) -> Option<String> {
        headers.get("x-checksum-md5")
            .or_else(|| headers.get("x-goog-meta-checksum-md5"))
            .and_then(|h| h.to_str().ok())
            .map(|s| s.to_string())
            .filter(|s| s.len() == 32)
    }

    async fn companion_sha1(&self, url: &str) -> Option<String> {
        let sha1_url = format!("{}.sha1", url);
        let response = match self.get(&sha1_url).await {
            Ok(r) => r,
            Err(e) => {
                debug!("no companion checksum for {}: {}", url, e);
                return None;
            }
        };

        let bytes = to_bytes(response.into_body()).await.ok()?;
        let text = String::from_utf8(bytes.to_vec()).ok()?;
        // "<hash>" or "<hash>  <file name>"
        text.split_whitespace()
            .next()
            .map(|s| s.to_ascii_lowercase())
            .filter(|s| s.len() == 40)
    }
}

#[async_trait]
impl RemoteStorage for HttpRemoteStorage {
    async fn fetch(&self, base_url: &str, path: &str) -> Result<RemoteContent, RemoteError> {
        let url = remote_url(base_url, path);
        let response = self.get(&url).await?;
        if Self::is_directory_listing(path, response.headers()) {
            debug!("{} is a directory on the remote", url);
            return Err(RemoteError::NotFound { url });
        }

        let length = response.headers().get(CONTENT_LENGTH)
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());
        let mut sha1 = Self::declared_sha1(response.headers());
        let md5 = Self::declared_md5(response.headers());

        let mut verifiers: Vec<Box<dyn StreamVerifier>> = vec![];
        if self.checksum_policy != ChecksumPolicy::Ignore {
            if sha1.is_none() {
                sha1 = self.companion_sha1(&url).await;
            }
            if sha1.is_none() && self.checksum_policy == ChecksumPolicy::Require {
                return Err(RemoteError::Verification { url, message: "no SHA1 checksum available".to_string() });
            }

            let verification = |message: String| RemoteError::Verification { url: url.clone(), message };
            if let Some(s) = &sha1 {
                let expected = <[u8; 20]>::from_hex(s).map_err(|e| verification(e.to_string()))?;
                verifiers.push(Box::new(Sha1StreamVerifier::new(expected)));
            }
            if let Some(m) = &md5 {
                let expected = <[u8; 16]>::from_hex(m).map_err(|e| verification(e.to_string()))?;
                verifiers.push(Box::new(Md5StreamVerifier::new(expected)));
            }
        }
        if verifiers.is_empty() {
            verifiers.push(Box::new(NopStreamVerifier {}));
        }

        let body: BlobStream = Box::pin(response.into_body().map(|chunk| chunk.map_err(anyhow::Error::from)));

        Ok(RemoteContent {
            url,
            stream: Box::pin(ValidatingStream::new(body, verifiers)),
            length,
            sha1,
            md5,
        })
    }
}
