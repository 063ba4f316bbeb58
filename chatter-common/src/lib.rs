//! Chatter Common - Shared configuration, error types, and logging.
//!
//! This crate provides:
//! - Configuration types and loading
//! - Error types and handling utilities
//! - Logging setup
//! - Small string utilities used across chatter crates

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;
pub mod util;

pub use config::{
    BackendConfig, Config, ContextConfig, DebounceConfig, EngagementConfig, ObservabilityConfig,
    StorageConfig,
};
pub use error::{Error, Result, ResultExt};
