//! Shared infrastructure for the gateway binary
//!
//! Configuration loading for every component and `tracing` subscriber setup.

pub mod config;
pub mod errors;
pub mod logging;

pub use crate::config::{load_config, load_config_with_prefix, GatewayConfig, ENV_PREFIX};
pub use errors::{Error, Result};
pub use logging::{log_welcome, setup_logging, LogSettings, LoggingConfig};
