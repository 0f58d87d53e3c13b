mod settings;

use std::path::Path;

use config::{Config, ConfigError, Environment, File, Source};

use settings::PartialSettings;

pub use settings::{BrokerSettings, LogSettings, ServerSettings, Settings, TransportKind};

/// File looked up (with any supported extension) when no path is given.
pub const DEFAULT_CONFIG: &str = "config/default";

/// Prefix of environment overrides, e.g. `TOPICD_SERVER__PORT=9000`.
pub const ENV_PREFIX: &str = "TOPICD";

/// Loads `config/default.*` if present, then environment overrides, and
/// merges the result over `Settings::default()`.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_with(File::with_name(DEFAULT_CONFIG).required(false))
}

/// Like `load_config`, but the file at `path` must exist.
pub fn load_config_from(path: &Path) -> Result<Settings, ConfigError> {
    load_with(File::from(path).required(true))
}

fn load_with<S>(file: S) -> Result<Settings, ConfigError>
where
    S: Source + Send + Sync + 'static,
{
    let config = Config::builder()
        .add_source(file)
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let partial: PartialSettings = config.try_deserialize()?;
    Ok(partial.merge(Settings::default()))
}
