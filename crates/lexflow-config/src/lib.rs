//! # LexFlow Config
//!
//! Layered configuration management for the LexFlow job engine.
//!
//! Configuration is assembled from TOML files (`default.toml`, an
//! environment-specific file, `local.toml`) overlaid with `LEXFLOW_`
//! prefixed environment variables, then validated before use.

pub mod app_config;
pub mod loader;

pub use app_config::{AppConfig, AppMetadata, ObservabilityConfig, ServerConfig};
pub use loader::ConfigLoader;
