//! Configuration management for type registries
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (typereg.toml)
//! - Environment variables (TYPEREG__*)
//!
//! ## Example config file (typereg.toml):
//! ```toml
//! [registry]
//! default_tag_field = "_type_tag"
//!
//! [codec]
//! output_format = "compact"
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, Result};

/// Discriminator field used when a registry is created without one
pub const DEFAULT_TAG_FIELD: &str = "_type_tag";

/// Main configuration for a type registry universe
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeRegConfig {
    /// Registry settings
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Codec settings
    #[serde(default)]
    pub codec: CodecConfig,
}

/// Registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Process-wide default discriminator field name
    #[serde(default = "default_tag_field")]
    pub default_tag_field: String,
}

/// Codec configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodecConfig {
    /// Output format for string encoding
    #[serde(default)]
    pub output_format: OutputFormat,
}

/// Output format for JSON
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Pretty,
    #[default]
    Compact,
}

fn default_tag_field() -> String {
    DEFAULT_TAG_FIELD.to_string()
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            default_tag_field: default_tag_field(),
        }
    }
}

impl TypeRegConfig {
    /// Load configuration from default locations
    pub fn load() -> std::result::Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration from a specific file
    pub fn load_from(config_path: Option<&str>) -> std::result::Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let config_locations = ["typereg.toml", ".typereg.toml", "config/typereg.toml"];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // XDG config directory
        if let Some(config_dir) = directories::ProjectDirs::from("dev", "familiar", "typereg") {
            let xdg_config = config_dir.config_dir().join("typereg.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Environment variables (TYPEREG__REGISTRY__DEFAULT_TAG_FIELD, ...)
        builder = builder.add_source(
            Environment::with_prefix("TYPEREG")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Reject settings no registry could be created with
    pub fn validate(&self) -> Result<()> {
        if self.registry.default_tag_field.trim().is_empty() {
            return Err(RegistryError::Configuration(
                "registry.default_tag_field must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = TypeRegConfig::default();
        assert_eq!(config.registry.default_tag_field, "_type_tag");
        assert_eq!(config.codec.output_format, OutputFormat::Compact);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_serialize_config() {
        let config = TypeRegConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[registry]"));
        assert!(toml_str.contains("[codec]"));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = TypeRegConfig::from_toml("[codec]\noutput_format = \"pretty\"\n").unwrap();
        assert_eq!(config.codec.output_format, OutputFormat::Pretty);
        assert_eq!(config.registry.default_tag_field, "_type_tag");
    }

    #[test]
    fn test_empty_tag_field_rejected() {
        let config = TypeRegConfig::from_toml("[registry]\ndefault_tag_field = \"\"\n").unwrap();
        assert!(matches!(config.validate(), Err(RegistryError::Configuration(_))));
    }

    #[test]
    fn test_save_and_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("typereg.toml");
        let path = path.to_str().unwrap();

        let mut config = TypeRegConfig::default();
        config.registry.default_tag_field = "kind".to_string();
        config.save(path).unwrap();

        let loaded = TypeRegConfig::load_from(Some(path)).unwrap();
        assert_eq!(loaded.registry.default_tag_field, "kind");
    }
}
