use crate::process::StreamPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_DIRECTORY: &str = "/usr/lib";
pub const DEFAULT_TIMEOUT_SECS: i64 = 300;
pub const DEFAULT_LABEL: &str = "ptest-runner";
pub const DEFAULT_DIAGNOSTICS_COMMAND: &str = "ptest-runner-collect-system-data";

/// Configuration loading and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {reason}")]
    Invalid { reason: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Settings for one ptest run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Roots scanned for `<package>/ptest/run-ptest`
    pub directories: Vec<PathBuf>,
    /// Inactivity window in seconds; zero or negative disables the timeout
    pub timeout_secs: i64,
    /// Where to write the XML report, if anywhere
    pub xml_path: Option<PathBuf>,
    /// Whether runner stderr is folded into stdout
    pub stream_policy: StreamPolicy,
    /// Command run after a timeout to capture system state
    pub diagnostics_command: Option<PathBuf>,
    /// Packages removed from the run
    pub exclude: Vec<String>,
    /// Name printed in the START/STOP markers
    pub label: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            directories: vec![PathBuf::from(DEFAULT_DIRECTORY)],
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            xml_path: None,
            stream_policy: StreamPolicy::default(),
            diagnostics_command: Some(PathBuf::from(DEFAULT_DIAGNOSTICS_COMMAND)),
            exclude: Vec::new(),
            label: DEFAULT_LABEL.to_string(),
        }
    }
}

impl RunnerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml_str(raw: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn load(path: &Path) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn with_directories(mut self, directories: Vec<PathBuf>) -> Self {
        self.directories = directories;
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: i64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_xml_path(mut self, xml_path: impl Into<PathBuf>) -> Self {
        self.xml_path = Some(xml_path.into());
        self
    }

    pub fn with_stream_policy(mut self, stream_policy: StreamPolicy) -> Self {
        self.stream_policy = stream_policy;
        self
    }

    pub fn with_diagnostics_command(mut self, command: Option<PathBuf>) -> Self {
        self.diagnostics_command = command;
        self
    }

    pub fn with_exclude(mut self, exclude: Vec<String>) -> Self {
        self.exclude = exclude;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Effective inactivity window; `None` means wait indefinitely.
    pub fn timeout(&self) -> Option<Duration> {
        timeout_from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.directories.is_empty() {
            return Err(ConfigError::Invalid {
                reason: "At least one ptest directory is required".to_string(),
            });
        }

        if self.label.is_empty() {
            return Err(ConfigError::Invalid {
                reason: "Label cannot be empty".to_string(),
            });
        }

        if let Some(command) = &self.diagnostics_command {
            if command.as_os_str().is_empty() {
                return Err(ConfigError::Invalid {
                    reason: "Diagnostics command cannot be empty".to_string(),
                });
            }
        }

        if self.exclude.iter().any(String::is_empty) {
            return Err(ConfigError::Invalid {
                reason: "Excluded ptest names cannot be empty".to_string(),
            });
        }

        Ok(())
    }
}

/// Map a configured timeout to a wait window. Non-positive values disable it.
pub fn timeout_from_secs(secs: i64) -> Option<Duration> {
    u64::try_from(secs)
        .ok()
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}
