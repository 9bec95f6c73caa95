//! The HTTP binding: `/content/<router path>` in the request path space of [`RepositoryRouter`].

use std::sync::Arc;

use axum::body::{Bytes, StreamBody};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

use crate::config::Vault;
use crate::error::ProxyError;
use crate::proxy::router::RepositoryRouter;
use crate::storage::item::StorageItem;

pub fn app(vault: Arc<Vault>) -> Router {
    Router::new()
        .route("/content", get(get_root))
        .route("/content/", get(get_root))
        .route("/content/*path", get(get_content).put(put_content).delete(delete_content))
        .layer(TraceLayer::new_for_http())
        .with_state(vault)
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = match &self {
            ProxyError::ItemNotFound { .. } | ProxyError::NoSuchRepository { .. } | ProxyError::MissingFacet { .. } => StatusCode::NOT_FOUND,
            ProxyError::AccessDenied { .. } => StatusCode::FORBIDDEN,
            ProxyError::IllegalOperation { .. } | ProxyError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ProxyError::RepositoryNotAvailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::InvalidConfiguration(_) | ProxyError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("{}", self);
        }
        else {
            debug!("{}", self);
        }
        (status, self.to_string()).into_response()
    }
}

#[derive(Debug, Serialize)]
struct ListingEntry {
    name: String,
    path: String,
    collection: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    length: Option<u64>,
    last_modified_millis: u64,
}

#[derive(Debug, Serialize)]
struct Listing {
    path: String,
    children: Vec<ListingEntry>,
}

impl From<&StorageItem> for ListingEntry {
    fn from(item: &StorageItem) -> Self {
        ListingEntry {
            name: item.name().to_string(),
            path: item.path().to_string(),
            collection: item.is_collection(),
            length: item.as_file().map(|f| f.length),
            last_modified_millis: item.attributes().created_millis,
        }
    }
}

async fn get_root(State(vault): State<Arc<Vault>>) -> Result<Response, ProxyError> {
    serve(&vault.router, "/", &vault).await
}

async fn get_content(State(vault): State<Arc<Vault>>, Path(path): Path<String>) -> Result<Response, ProxyError> {
    serve(&vault.router, &path, &vault).await
}

async fn serve(router: &RepositoryRouter, path: &str, vault: &Vault) -> Result<Response, ProxyError> {
    let ctx = vault.request_context();
    let item = router.retrieve(path, &ctx).await?;

    match item {
        StorageItem::Collection(collection) => {
            let mut children = router.list(path, &ctx).await?;
            children.sort_by(|a, b| a.path().cmp(b.path()));
            let listing = Listing {
                path: collection.uid.path,
                children: children.iter().map(ListingEntry::from).collect(),
            };
            Ok(Json(listing).into_response())
        }
        StorageItem::File(file) => {
            let stream = file.locator.content().await?;
            Ok((
                [
                    (header::CONTENT_TYPE, file.mime_type.clone()),
                    (header::CONTENT_LENGTH, file.length.to_string()),
                ],
                StreamBody::new(stream),
            ).into_response())
        }
    }
}

async fn put_content(State(vault): State<Arc<Vault>>, Path(path): Path<String>, body: Bytes) -> Result<StatusCode, ProxyError> {
    vault.router.store(&path, body, &vault.request_context()).await?;
    Ok(StatusCode::CREATED)
}

async fn delete_content(State(vault): State<Arc<Vault>>, Path(path): Path<String>) -> Result<StatusCode, ProxyError> {
    vault.router.delete(&path, &vault.request_context()).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod test {
    use axum::body::Body;
    use axum::http::{Method, Request};
    use rstest::*;
    use tower::ServiceExt;

    use crate::config::VaultConfig;

    use super::*;

    const CONFIG: &str = r#"
[[repositories]]
id = "releases"
type = "hosted"

[[repositories]]
id = "hidden"
type = "hosted"
exposed = false

[[repositories]]
id = "public"
type = "group"
members = ["releases"]
"#;

    async fn app_under_test() -> Router {
        let vault = VaultConfig::from_toml_str(CONFIG).unwrap().build().await.unwrap();
        app(Arc::new(vault))
    }

    async fn call(app: &Router, method: Method, uri: &str, body: &'static str) -> (StatusCode, Bytes) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::from(body))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        (status, hyper::body::to_bytes(response.into_body()).await.unwrap())
    }

    #[tokio::test]
    async fn test_store_and_retrieve() {
        let app = app_under_test().await;
        let (status, _) = call(&app, Method::PUT, "/content/repositories/releases/org/x/a/1.0/a-1.0.pom", "<project/>").await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = call(&app, Method::GET, "/content/groups/public/org/x/a/1.0/a-1.0.pom", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Bytes::from_static(b"<project/>"));

        let (status, body) = call(&app, Method::GET, "/content/repositories/releases/org/x/a/1.0", "").await;
        assert_eq!(status, StatusCode::OK);
        let listing: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(listing["children"][0]["name"], "a-1.0.pom");
        assert_eq!(listing["children"][0]["length"], 10);

        let (status, _) = call(&app, Method::DELETE, "/content/repositories/releases/org/x/a/1.0/a-1.0.pom", "").await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = call(&app, Method::GET, "/content/repositories/releases/org/x/a/1.0/a-1.0.pom", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[rstest]
    #[case::unknown_repository(Method::GET, "/content/repositories/nope/a.jar", StatusCode::NOT_FOUND)]
    #[case::unexposed(Method::GET, "/content/repositories/hidden/", StatusCode::NOT_FOUND)]
    #[case::group_write(Method::PUT, "/content/groups/public/a.jar", StatusCode::BAD_REQUEST)]
    #[case::virtual_write(Method::PUT, "/content/repositories", StatusCode::BAD_REQUEST)]
    #[case::root(Method::GET, "/content", StatusCode::OK)]
    #[tokio::test]
    async fn test_status(#[case] method: Method, #[case] uri: &str, #[case] expected: StatusCode) {
        let app = app_under_test().await;
        assert_eq!(call(&app, method, uri, "x").await.0, expected);
    }

    #[tokio::test]
    async fn test_virtual_listing() {
        let app = app_under_test().await;
        let (_, body) = call(&app, Method::GET, "/content/repositories", "").await;
        let listing: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let names: Vec<_> = listing["children"].as_array().unwrap().iter()
            .map(|c| c["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["public", "releases"]);
    }
}
