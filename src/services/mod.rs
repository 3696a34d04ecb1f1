//! Services behind the CLI and the HTTP handlers.

pub mod bucket_backend;
pub mod image_contract;
pub mod page_service;
pub mod provisioner;
pub mod report;
pub mod state_store;
