//! Configuration Module
//!
//! Configuration loading from environment variables.

mod settings;

pub use settings::{AppConfig, ConfigError, ProviderEndpoint};
