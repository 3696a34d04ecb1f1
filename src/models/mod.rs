//! Core data models of the fixture.
//!
//! The page is a read-only asset served by the HTTP side. The bucket and the
//! random suffix are the two provisioned resources; they serialize as JSON
//! attributes into the SQLite state store via `serde`.

pub mod bucket;
pub mod page;
pub mod random_suffix;
