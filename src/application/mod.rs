//! Application services: loading, incremental updates and the refresh pipelines.

pub mod batch;
pub mod error;
pub mod fallback;
pub mod incremental;
pub mod loader;
pub mod pins;
pub mod previews;
pub mod screenshots;
pub mod site_config;
