//! Layered configuration
//!
//! Built-in defaults, then `synchro.toml` (or an explicit file), then
//! `SYNCHRO_<SECTION>__<KEY>` environment variables.
//!
//! ```rust,ignore
//! let settings = Settings::builder()
//!     .config_path(Some("robot.toml"))
//!     .build()?;
//! let controller = ControllerBuilder::new(program)
//!     .config(settings.controller_config())
//!     .build();
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::controller::ControllerConfig;
use crate::device::DeviceSelector;

/// File looked up in the working directory when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "synchro";
pub const ENV_PREFIX: &str = "SYNCHRO";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("clock.tick_frequency must be a positive number, got {0}")]
    TickFrequency(f64),

    #[error("engine.max_call_depth must be at least 1")]
    CallDepth,

    #[error("program.entry must not be empty")]
    EmptyEntry,

    #[error("failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),
}

/* ===================== Settings ===================== */

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub program: ProgramSettings,
    pub clock: ClockSettings,
    pub device: DeviceSettings,
    pub engine: EngineSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgramSettings {
    /// Module files; the first one is the main module
    pub modules: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main_module: Option<String>,
    pub entry: String,
}

impl Default for ProgramSettings {
    fn default() -> Self {
        Self {
            modules: Vec::new(),
            main_module: None,
            entry: "Main".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockSettings {
    /// Ticks per second
    pub tick_frequency: f64,
}

impl Default for ClockSettings {
    fn default() -> Self {
        Self {
            tick_frequency: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    pub selector: DeviceSelector,
    /// Ticks a simulated request takes to complete
    pub latency_ticks: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub max_call_depth: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self { max_call_depth: 64 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` directives used when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl Settings {
    pub fn builder() -> SettingsBuilder {
        SettingsBuilder::new()
    }

    /// Defaults, `./synchro.toml` if present, then the environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::builder().build()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let frequency = self.clock.tick_frequency;
        if !frequency.is_finite() || frequency <= 0.0 {
            return Err(ConfigError::TickFrequency(frequency));
        }
        if self.engine.max_call_depth == 0 {
            return Err(ConfigError::CallDepth);
        }
        if self.program.entry.trim().is_empty() {
            return Err(ConfigError::EmptyEntry);
        }
        Ok(())
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            main_module: self.program.main_module.clone(),
            entry: self.program.entry.clone(),
            tick_frequency: self.clock.tick_frequency,
            max_call_depth: self.engine.max_call_depth,
        }
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/* ===================== Builder ===================== */

pub struct SettingsBuilder {
    config_path: Option<PathBuf>,
    env_prefix: String,
}

impl SettingsBuilder {
    pub fn new() -> Self {
        Self {
            config_path: None,
            env_prefix: ENV_PREFIX.to_string(),
        }
    }

    /// Explicit file; unlike the default lookup it must exist
    pub fn config_path<P: AsRef<Path>>(mut self, path: Option<P>) -> Self {
        self.config_path = path.map(|p| p.as_ref().to_path_buf());
        self
    }

    pub fn env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn build(self) -> Result<Settings, ConfigError> {
        let defaults = config::Config::try_from(&Settings::default())?;
        let mut builder = config::Config::builder().add_source(defaults);

        builder = match &self.config_path {
            Some(path) => builder.add_source(config::File::from(path.as_path()).required(true)),
            None => builder.add_source(config::File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };

        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("program.modules"),
        );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;

        tracing::debug!(
            path = ?self.config_path,
            tick_frequency = settings.clock.tick_frequency,
            "configuration loaded"
        );
        Ok(settings)
    }
}

impl Default for SettingsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
