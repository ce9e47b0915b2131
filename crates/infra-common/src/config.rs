//! Gateway configuration file
//!
//! One TOML document with a section per component. Every field has a
//! default, and `CELLGATE__SECTION__FIELD` environment variables override
//! what the file says.

use std::path::Path;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::debug;

use cellgate_call_engine::BridgeConfig;
use cellgate_dialog_core::SipConfig;
use cellgate_media_core::MediaConfig;

use crate::errors::{Error, Result};
use crate::logging::LogSettings;

/// Environment prefix for overrides
pub const ENV_PREFIX: &str = "CELLGATE";

/// Complete gateway configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub sip: SipConfig,
    pub media: MediaConfig,
    pub bridge: BridgeConfig,
    pub logging: LogSettings,
}

impl GatewayConfig {
    /// Check every section
    pub fn validate(&self) -> Result<()> {
        self.sip
            .validate()
            .map_err(|e| Error::Config(format!("[sip] {}", e)))?;
        self.media
            .validate()
            .map_err(|e| Error::Config(format!("[media] {}", e)))?;
        self.bridge
            .validate()
            .map_err(|e| Error::Config(format!("[bridge] {}", e)))?;
        self.logging.to_logging_config("cellgate")?;
        Ok(())
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }
}

/// Load `path` with `CELLGATE__*` overrides and validate the result
pub fn load_config(path: &Path) -> Result<GatewayConfig> {
    let config = load_config_with_prefix(Some(path), ENV_PREFIX)?;
    config.validate()?;
    Ok(config)
}

/// Layer an optional file under environment variables named
/// `{prefix}__SECTION__FIELD`, without validating
pub fn load_config_with_prefix(path: Option<&Path>, prefix: &str) -> Result<GatewayConfig> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        if !path.exists() {
            return Err(Error::Config(format!(
                "configuration file {} not found",
                path.display()
            )));
        }
        debug!(path = %path.display(), "Loading configuration file");
        builder = builder.add_source(File::from(path).required(true));
    }

    let config: GatewayConfig = builder
        .add_source(
            Environment::with_prefix(prefix)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_render_and_reparse() {
        let config = GatewayConfig::default();
        let text = config.to_toml().unwrap();
        assert!(text.contains("[bridge]"));
        let parsed: GatewayConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_default_needs_account() {
        let err = GatewayConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("[sip]"));
    }

    #[test]
    fn test_missing_file() {
        let err = load_config(Path::new("/nonexistent/cellgate.toml")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
