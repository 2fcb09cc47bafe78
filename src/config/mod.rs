// src/config/mod.rs

//! Configuration loading and validation for batchdag.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk and apply env overrides (`loader.rs`).
//! - Validate limits and executor references (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{apply_env_overrides, default_config_path, load_and_validate, load_from_path, load_or_default};
pub use model::{
    CheckpointSection, ConfigFile, ExecutionSection, ExecutorConfig, GateConfig, GatesSection,
    RawConfigFile, RoutingSection,
};
pub use validate::validate_raw_config;
