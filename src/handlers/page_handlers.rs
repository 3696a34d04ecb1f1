//! HTTP handlers for the static page.
//! The body is served straight from the in-memory `PageAsset`; nothing here
//! touches the filesystem.

use crate::{errors::AppError, services::page_service::PageService};
use axum::{
    body::Body,
    extract::{OriginalUri, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize)]
pub struct HelloQuery {
    pub name: Option<String>,
}

/// `GET /` and `GET /index.html`: the bundled document. HEAD is answered
/// by axum with the same headers and no body.
pub async fn index(State(service): State<PageService>, headers: HeaderMap) -> Response {
    let page = &service.page;

    let not_modified = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.split(',').any(|tag| tag.trim() == page.etag || tag.trim() == "*"));

    let mut response = if not_modified {
        debug!("page not modified");
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NOT_MODIFIED;
        response
    } else {
        debug!("serving page ({} bytes)", page.len());
        let mut response = Response::new(Body::from(page.body.clone()));
        let response_headers = response.headers_mut();
        response_headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(page.content_type()),
        );
        response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(page.len()));
        response
    };

    if let Ok(value) = HeaderValue::from_str(&page.etag) {
        response.headers_mut().insert(header::ETAG, value);
    }
    response
}

/// `GET /hello?name=`: a greeting with the name escaped.
pub async fn hello(
    State(service): State<PageService>,
    Query(q): Query<HelloQuery>,
) -> impl IntoResponse {
    Html(service.greeting(q.name.as_deref()))
}

/// Fallback for every unknown route.
pub async fn not_found(OriginalUri(uri): OriginalUri) -> AppError {
    AppError::not_found(format!("no route for {}", uri.path()))
}
