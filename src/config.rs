//! Engine configuration.
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic**: values set via [`EngineConfigBuilder`] methods
//! 2. **Environment variables**: values from `SLUICE_*` env vars
//! 3. **Config file**: an `[engine]` table in a TOML file (requires the
//!    `config-file` feature)
//! 4. **Defaults**: [`EngineConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `SLUICE_OUTPUT_BUFFER` | `usize` | `output_buffer` |
//! | `SLUICE_CHUNK_SIZE` | `usize` | `chunk_size` |
//! | `SLUICE_TRACE_SCOPES` | `bool` | `trace_scopes` |

use std::sync::OnceLock;

use crate::error::{Error, ErrorKind};

/// Environment variable name for the merge/par_join hand-off capacity.
pub const ENV_OUTPUT_BUFFER: &str = "SLUICE_OUTPUT_BUFFER";
/// Environment variable name for the default chunk grouping.
pub const ENV_CHUNK_SIZE: &str = "SLUICE_CHUNK_SIZE";
/// Environment variable name for per-scope trace events.
pub const ENV_TRACE_SCOPES: &str = "SLUICE_TRACE_SCOPES";

/// Errors raised while loading configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable held an unparseable value.
    #[error("invalid value for {var}: expected {expected}, got {value:?}")]
    InvalidEnv {
        /// Variable name.
        var: &'static str,
        /// Expected type.
        expected: &'static str,
        /// The raw value.
        value: String,
    },
    /// A setting is outside its allowed range.
    #[error("{field} must be at least 1")]
    Zero {
        /// Field name.
        field: &'static str,
    },
    /// The TOML file could not be read.
    #[error("failed to read config file {path}: {message}")]
    Io {
        /// File path.
        path: String,
        /// I/O error text.
        message: String,
    },
    /// The TOML text could not be parsed.
    #[error("failed to parse TOML config: {0}")]
    Toml(String),
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Self::new(ErrorKind::Config)
            .with_message(err.to_string())
            .with_source(err)
    }
}

/// Tunables shared by every compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Capacity of the hand-off queue between concurrent producers and the
    /// consuming pull.
    pub output_buffer: usize,
    /// Elements per chunk for `Stream::from_iter` and `Stream::range`.
    pub chunk_size: usize,
    /// Emit a trace event for every scope open and close.
    pub trace_scopes: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            output_buffer: 1,
            chunk_size: 64,
            trace_scopes: false,
        }
    }
}

impl EngineConfig {
    /// Starts a builder seeded with defaults.
    #[must_use]
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Defaults overridden by the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        apply_env_overrides(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    /// The process-wide configuration.
    ///
    /// Built from the environment on first use and memoized. An invalid
    /// environment falls back to defaults and logs a warning.
    pub fn global() -> &'static Self {
        static GLOBAL: OnceLock<EngineConfig> = OnceLock::new();
        GLOBAL.get_or_init(|| {
            Self::from_env().unwrap_or_else(|err| {
                crate::tracing_compat::warn!(error = %err, "ignoring invalid engine environment");
                Self::default()
            })
        })
    }

    /// Checks range constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.output_buffer == 0 {
            return Err(ConfigError::Zero {
                field: "output_buffer",
            });
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::Zero {
                field: "chunk_size",
            });
        }
        Ok(())
    }
}

/// Builder for [`EngineConfig`].
#[derive(Debug, Clone, Default)]
pub struct EngineConfigBuilder {
    output_buffer: Option<usize>,
    chunk_size: Option<usize>,
    trace_scopes: Option<bool>,
    #[cfg(feature = "config-file")]
    file: Option<EngineToml>,
    use_env: bool,
}

impl EngineConfigBuilder {
    /// Sets the hand-off queue capacity.
    #[must_use]
    pub fn output_buffer(mut self, n: usize) -> Self {
        self.output_buffer = Some(n);
        self
    }

    /// Sets the chunk grouping for iterator sources.
    #[must_use]
    pub fn chunk_size(mut self, n: usize) -> Self {
        self.chunk_size = Some(n);
        self
    }

    /// Enables per-scope trace events.
    #[must_use]
    pub fn trace_scopes(mut self, on: bool) -> Self {
        self.trace_scopes = Some(on);
        self
    }

    /// Layers environment overrides under the programmatic values.
    #[must_use]
    pub fn with_env(mut self) -> Self {
        self.use_env = true;
        self
    }

    /// Layers a TOML file under the environment and programmatic values.
    #[cfg(feature = "config-file")]
    pub fn with_toml_file(mut self, path: &std::path::Path) -> Result<Self, ConfigError> {
        self.file = Some(parse_toml_file(path)?.engine);
        Ok(self)
    }

    /// Layers TOML text under the environment and programmatic values.
    #[cfg(feature = "config-file")]
    pub fn with_toml_str(mut self, text: &str) -> Result<Self, ConfigError> {
        self.file = Some(parse_toml_str(text)?.engine);
        Ok(self)
    }

    /// Resolves all layers and validates the result.
    pub fn build(self) -> Result<EngineConfig, ConfigError> {
        let mut config = EngineConfig::default();
        #[cfg(feature = "config-file")]
        if let Some(file) = &self.file {
            apply_toml_config(&mut config, file);
        }
        if self.use_env {
            apply_env_overrides(&mut config)?;
        }
        if let Some(v) = self.output_buffer {
            config.output_buffer = v;
        }
        if let Some(v) = self.chunk_size {
            config.chunk_size = v;
        }
        if let Some(v) = self.trace_scopes {
            config.trace_scopes = v;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Apply environment variable overrides to an [`EngineConfig`].
///
/// Only variables that are set are applied.
pub fn apply_env_overrides(config: &mut EngineConfig) -> Result<(), ConfigError> {
    if let Some(val) = read_env(ENV_OUTPUT_BUFFER) {
        config.output_buffer = parse_usize(ENV_OUTPUT_BUFFER, &val)?;
    }
    if let Some(val) = read_env(ENV_CHUNK_SIZE) {
        config.chunk_size = parse_usize(ENV_CHUNK_SIZE, &val)?;
    }
    if let Some(val) = read_env(ENV_TRACE_SCOPES) {
        config.trace_scopes = parse_bool(ENV_TRACE_SCOPES, &val)?;
    }
    Ok(())
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_usize(var: &'static str, val: &str) -> Result<usize, ConfigError> {
    val.trim()
        .parse::<usize>()
        .map_err(|_| ConfigError::InvalidEnv {
            var,
            expected: "unsigned integer",
            value: val.to_string(),
        })
}

fn parse_bool(var: &'static str, val: &str) -> Result<bool, ConfigError> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            var,
            expected: "bool (true/false/1/0/yes/no)",
            value: val.to_string(),
        }),
    }
}

/// TOML-deserializable engine configuration.
///
/// ```toml
/// [engine]
/// output_buffer = 4
/// chunk_size = 256
/// trace_scopes = true
/// ```
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct TomlConfig {
    /// Engine settings.
    #[serde(default)]
    pub engine: EngineToml,
}

/// `[engine]` table of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug, Clone)]
pub struct EngineToml {
    /// Hand-off queue capacity.
    pub output_buffer: Option<usize>,
    /// Chunk grouping for iterator sources.
    pub chunk_size: Option<usize>,
    /// Per-scope trace events.
    pub trace_scopes: Option<bool>,
}

/// Apply a parsed `[engine]` table. Only `Some` fields override.
#[cfg(feature = "config-file")]
pub fn apply_toml_config(config: &mut EngineConfig, toml: &EngineToml) {
    if let Some(v) = toml.output_buffer {
        config.output_buffer = v;
    }
    if let Some(v) = toml.chunk_size {
        config.chunk_size = v;
    }
    if let Some(v) = toml.trace_scopes {
        config.trace_scopes = v;
    }
}

/// Parse TOML text into a [`TomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_str(text: &str) -> Result<TomlConfig, ConfigError> {
    toml::from_str(text).map_err(|e| ConfigError::Toml(e.to_string()))
}

/// Read and parse a TOML file into a [`TomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_file(path: &std::path::Path) -> Result<TomlConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    parse_toml_str(&content)
}
