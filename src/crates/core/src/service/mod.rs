//! Service layer - configuration

pub mod config;

pub use config::{CacheConfig, ChorusConfig, ModelConfig, OrchestratorConfig};
