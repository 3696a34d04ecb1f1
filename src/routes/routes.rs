//! Defines the routes of the page server.
//!
//! ## Structure
//! - `GET /`, `GET /index.html`: the bundled HTML document
//! - `GET /hello?name=`: escaped greeting
//! - `GET /healthz`, `GET /readyz`: probes
//!
//! Anything else answers 404 with a JSON error body.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        page_handlers::{hello, index, not_found},
    },
    services::page_service::PageService,
};
use axum::{Router, routing::get};

/// Build the router. It carries `PageService` to all handlers.
pub fn routes() -> Router<PageService> {
    Router::new()
        // health endpoints
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // page
        .route("/", get(index))
        .route("/index.html", get(index))
        .route("/hello", get(hello))
        .fallback(not_found)
}

/// The router with its state attached, ready to serve.
pub fn app(service: PageService) -> Router {
    routes().with_state(service)
}
