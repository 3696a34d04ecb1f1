//! A deployable fixture: a container that serves one static page, the build
//! contract for that container, and the declarative provisioning of one
//! deliberately public object-storage bucket.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod server;
pub mod services;
