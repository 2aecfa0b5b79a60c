//! ConfigLoader: composes defaults, files and environment into PinsetConfig.

use super::{global_config_path, PinsetConfig};
use crate::error::Result;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use std::path::Path;

/// Configuration loader facade.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration.
    /// Precedence: defaults (lowest) -> global file -> explicit file -> environment (highest).
    pub fn load(explicit: Option<&Path>) -> Result<PinsetConfig> {
        let mut builder = Self::builder_with_defaults()?;
        if let Some(global) = global_config_path() {
            builder = builder.add_source(
                File::from(global)
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }
        if let Some(path) = explicit {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }
        let builder = Self::add_environment(builder);

        let config: PinsetConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML string with environment overlay.
    pub fn load_from_str(toml: &str) -> Result<PinsetConfig> {
        let builder = Self::builder_with_defaults()?
            .add_source(File::from_str(toml, FileFormat::Toml));
        let builder = Self::add_environment(builder);

        let config: PinsetConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>> {
        let defaults = Config::try_from(&PinsetConfig::default())?;
        Ok(Config::builder().add_source(defaults))
    }

    /// PINSET_ prefix and `__` separator for nested keys.
    fn add_environment(builder: ConfigBuilder<DefaultState>) -> ConfigBuilder<DefaultState> {
        builder.add_source(
            Environment::with_prefix("PINSET")
                .separator("__")
                .try_parsing(true),
        )
    }
}
