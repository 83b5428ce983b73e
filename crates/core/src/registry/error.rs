//! Error types for configuration loading and validation.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading, validating, or persisting the
/// agent/template configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read a configuration file from disk.
    #[error("failed to read config file at {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("failed to parse YAML file at {path}: {source}")]
    YamlParse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    /// Failed to parse TOML configuration.
    #[error("failed to parse TOML file at {path}: {source}")]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// Failed to persist a configuration document.
    #[error("failed to write config file at {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to serialize a configuration document.
    #[error("failed to serialize {what}: {source}")]
    Serialize {
        what: &'static str,
        source: serde_yaml::Error,
    },

    /// Two records share a name.
    #[error("duplicate agent name: {name}")]
    DuplicateAgent { name: String },

    #[error("duplicate template name: {name}")]
    DuplicateTemplate { name: String },

    /// A name collides with a reserved `__…__` sentinel.
    #[error("reserved name: {name}")]
    ReservedName { name: String },

    /// A template references an agent the catalogue does not define.
    #[error("template {template} references unknown agent: {agent}")]
    UnknownAgent { template: String, agent: String },
}

/// Type alias for Result with ConfigError.
pub type ConfigResult<T> = Result<T, ConfigError>;
