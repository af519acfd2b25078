//! bleid CLI configuration
//!
//! Configuration is layered with figment, later sources overriding earlier
//! ones:
//! 1. Built-in defaults
//! 2. `bleid.toml` in the working directory, or the file given with `--config`
//! 3. Environment variables prefixed with `BLEID_`, nested with `__`
//!    (e.g. `BLEID_COORDINATOR__PRIVACY__MAX_IDENTITIES=8`)
//! 4. Command line flags

use std::path::Path;

use anyhow::Context;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use bleid_core::{BdAddr, CoordinatorConfig, Irk};

use crate::error::{CliError, Result};

const DEFAULT_CONFIG_FILE: &str = "bleid.toml";
const ENV_PREFIX: &str = "BLEID_";

// ----------------------------------------------------------------------------
// Application Configuration
// ----------------------------------------------------------------------------

/// Settings of the simulated controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Public address of the default identity, written most significant first
    pub public_address: String,
    /// Resolving key of the default identity as hex; generated when absent
    pub identity_key: Option<String>,
    /// Delay the simulated controller adds to every command, in milliseconds
    pub latency_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            public_address: "00:1B:DC:00:00:01".to_string(),
            identity_key: None,
            latency_ms: 2,
        }
    }
}

/// Complete configuration for the bleid CLI
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub coordinator: CoordinatorConfig,
    pub controller: ControllerConfig,
}

impl AppConfig {
    /// Load from `bleid.toml` and the environment
    pub fn load() -> Result<Self> {
        Self::extract(Self::base().merge(Toml::file(DEFAULT_CONFIG_FILE)))
    }

    /// Load from a specific file and the environment
    ///
    /// Unlike [`AppConfig::load`], the file must exist.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CliError::Config(format!(
                "configuration file {} not found",
                path.display()
            )));
        }
        Self::extract(Self::base().merge(Toml::file(path)))
    }

    fn base() -> Figment {
        Figment::new().merge(Serialized::defaults(Self::default()))
    }

    fn extract(figment: Figment) -> Result<Self> {
        let config: AppConfig = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Check values the coordinator cannot work with
    pub fn validate(&self) -> Result<()> {
        let privacy = &self.coordinator.privacy;
        if privacy.max_identities == 0 {
            return Err(CliError::Config(
                "max_identities must include the default identity".to_string(),
            ));
        }
        if privacy.max_identities > usize::from(u8::MAX) + 1 {
            return Err(CliError::Config(format!(
                "max_identities {} exceeds the identity index range",
                privacy.max_identities
            )));
        }
        if privacy.privacy_enabled && privacy.rpa_timeout.is_zero() {
            return Err(CliError::Config(
                "rpa_timeout must be non-zero when privacy is enabled".to_string(),
            ));
        }
        if self.coordinator.command_timeout.is_zero() {
            return Err(CliError::Config(
                "command_timeout must be non-zero".to_string(),
            ));
        }
        if self.coordinator.random_retry.max_attempts == 0 {
            return Err(CliError::Config(
                "random_retry.max_attempts must be at least 1".to_string(),
            ));
        }
        self.public_address()?;
        self.identity_key()?;
        Ok(())
    }

    pub fn public_address(&self) -> Result<BdAddr> {
        self.controller.public_address.parse().map_err(|err| {
            CliError::Config(format!(
                "controller.public_address {:?}: {}",
                self.controller.public_address, err
            ))
        })
    }

    pub fn identity_key(&self) -> Result<Option<Irk>> {
        self.controller
            .identity_key
            .as_deref()
            .map(|key| {
                key.parse()
                    .map_err(|err| CliError::Config(format!("controller.identity_key: {}", err)))
            })
            .transpose()
    }

    /// Apply command line overrides
    pub fn with_privacy_disabled(mut self) -> Self {
        self.coordinator.privacy.privacy_enabled = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert!(config.coordinator.privacy.privacy_enabled);
        assert_eq!(config.identity_key().unwrap(), None);
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let figment = AppConfig::base().merge(Toml::string(
            r#"
            [coordinator.privacy]
            max_identities = 6

            [controller]
            public_address = "11:22:33:44:55:66"
            latency_ms = 0
            "#,
        ));
        let config: AppConfig = figment.extract().unwrap();

        assert_eq!(config.coordinator.privacy.max_identities, 6);
        assert!(config.coordinator.privacy.privacy_enabled);
        assert_eq!(config.controller.latency_ms, 0);
        assert_eq!(
            config.public_address().unwrap(),
            BdAddr::from_msb([0x11, 0x22, 0x33, 0x44, 0x55, 0x66])
        );
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.coordinator.privacy.max_identities = 0;
        assert!(matches!(config.validate(), Err(CliError::Config(_))));

        let mut config = AppConfig::default();
        config.controller.identity_key = Some("not-hex".to_string());
        assert!(matches!(config.validate(), Err(CliError::Config(_))));

        let config = AppConfig::default().with_privacy_disabled();
        assert!(!config.coordinator.privacy.privacy_enabled);
        config.validate().unwrap();
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let err = AppConfig::load_from_file("/nonexistent/bleid.toml").unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
