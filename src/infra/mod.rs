//! Infrastructure adapters: JSON files, HTTP/CLI fetchers and runtime bootstrap.

pub mod error;
pub mod fetch;
pub mod github;
pub mod json_store;
pub mod telemetry;
