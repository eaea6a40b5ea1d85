//! Configuration loading
//!
//! Settings are layered, later layers winning:
//!
//! 1. Built-in defaults ([`Config::default`])
//! 2. A TOML file: the builder's `config_path`, else `SCRATCHPAD_CONFIG_PATH`,
//!    else `./scratchpad.toml` if present
//! 3. `SCRATCHPAD__SECTION__KEY` environment variables
//! 4. Short environment overrides (`SCRATCHPAD_FORCE_SUBPROCESS`,
//!    `SCRATCHPAD_PREFER_ISOLATED`, `SCRATCHPAD_NODE_PATH`)
//! 5. Values set explicitly on the builder
//!
//! `.env` files are read through `dotenvy` before the environment is consulted.
//!
//! # Example
//!
//! ```rust,no_run
//! use scratchpad_core::config::Config;
//!
//! let config = Config::builder()
//!     .config_path("scratchpad.toml")
//!     .force_subprocess(true)
//!     .build()?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "SCRATCHPAD";
pub const CONFIG_PATH_ENV: &str = "SCRATCHPAD_CONFIG_PATH";
pub const FORCE_SUBPROCESS_ENV: &str = "SCRATCHPAD_FORCE_SUBPROCESS";
pub const PREFER_ISOLATED_ENV: &str = "SCRATCHPAD_PREFER_ISOLATED";
pub const NODE_PATH_ENV: &str = "SCRATCHPAD_NODE_PATH";

const DEFAULT_CONFIG_FILE: &str = "scratchpad.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub execution: ExecutionSettings,
    pub isolated: IsolatedSettings,
    pub subprocess: SubprocessSettings,
}

/// Backend selection and timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    /// Timeout applied when a request does not carry its own
    pub default_timeout_ms: u64,

    /// Route every request through the subprocess backend
    pub force_subprocess: bool,

    /// Use the in-process engine whenever the script allows it
    pub prefer_isolated: bool,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            default_timeout_ms: 5_000,
            force_subprocess: false,
            prefer_isolated: true,
        }
    }
}

impl ExecutionSettings {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// Apply the short environment overrides on top of these settings.
    ///
    /// Called at every backend decision so toggling the variables affects
    /// the next request without reloading.
    pub fn with_env_overrides(&self) -> Self {
        let mut settings = self.clone();
        if let Some(force) = env_flag(FORCE_SUBPROCESS_ENV) {
            settings.force_subprocess = force;
        }
        if let Some(prefer) = env_flag(PREFER_ISOLATED_ENV) {
            settings.prefer_isolated = prefer;
        }
        settings
    }
}

/// Limits for the in-process engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolatedSettings {
    pub memory_limit_bytes: usize,
    pub max_stack_bytes: usize,
}

impl Default for IsolatedSettings {
    fn default() -> Self {
        Self {
            memory_limit_bytes: 64 * 1024 * 1024,
            max_stack_bytes: 1024 * 1024,
        }
    }
}

/// Out-of-process runner settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubprocessSettings {
    /// Explicit runtime binary; searched on `PATH` when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_path: Option<PathBuf>,

    /// Directory scripts run in and resolve packages from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,

    /// Extra time allowed beyond the request timeout so the runner can
    /// report its own timeout before being killed
    pub exit_grace_ms: u64,
}

impl Default for SubprocessSettings {
    fn default() -> Self {
        Self {
            runtime_path: None,
            working_directory: None,
            exit_grace_ms: 1_000,
        }
    }
}

impl SubprocessSettings {
    pub fn exit_grace(&self) -> Duration {
        Duration::from_millis(self.exit_grace_ms)
    }

    /// Working directory hint, defaulting to the process's current directory.
    pub fn resolved_working_directory(&self) -> PathBuf {
        self.working_directory
            .clone()
            .or_else(|| env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load using the default search order.
    pub fn load() -> Result<Self> {
        Self::builder().build()
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to render configuration as TOML")
    }
}

/// Builder for [`Config`]. Explicit values beat every other layer.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config_path: Option<PathBuf>,
    runtime_path: Option<PathBuf>,
    working_directory: Option<PathBuf>,
    default_timeout: Option<Duration>,
    force_subprocess: Option<bool>,
    read_dotenv: bool,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self {
            config_path: None,
            runtime_path: None,
            working_directory: None,
            default_timeout: None,
            force_subprocess: None,
            read_dotenv: true,
        }
    }
}

impl ConfigBuilder {
    /// Set the config file path
    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Set the runtime binary used by the subprocess backend
    pub fn runtime_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.runtime_path = Some(path.into());
        self
    }

    pub fn working_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(path.into());
        self
    }

    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub fn force_subprocess(mut self, force: bool) -> Self {
        self.force_subprocess = Some(force);
        self
    }

    /// Skip reading `.env` files (tests)
    pub fn without_dotenv(mut self) -> Self {
        self.read_dotenv = false;
        self
    }

    pub fn build(self) -> Result<Config> {
        if self.read_dotenv {
            let _ = dotenvy::dotenv();
        }

        let defaults = config::Config::try_from(&Config::default())
            .context("Failed to seed configuration defaults")?;

        let config_path = self
            .config_path
            .clone()
            .or_else(|| env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));

        let file_source = match &config_path {
            Some(path) => config::File::from(path.as_path()).required(true),
            None => config::File::from(Path::new(DEFAULT_CONFIG_FILE)).required(false),
        };

        let runtime_override = self
            .runtime_path
            .or_else(|| env::var_os(NODE_PATH_ENV).map(PathBuf::from))
            .map(|path| path.to_string_lossy().into_owned());

        let loaded = config::Config::builder()
            .add_source(defaults)
            .add_source(file_source)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("execution.force_subprocess", env_flag(FORCE_SUBPROCESS_ENV))?
            .set_override_option("execution.prefer_isolated", env_flag(PREFER_ISOLATED_ENV))?
            .set_override_option("subprocess.runtime_path", runtime_override)?
            .set_override_option(
                "subprocess.working_directory",
                self.working_directory
                    .map(|path| path.to_string_lossy().into_owned()),
            )?
            .set_override_option(
                "execution.default_timeout_ms",
                self.default_timeout.map(|timeout| timeout.as_millis() as i64),
            )?
            .set_override_option("execution.force_subprocess", self.force_subprocess)?
            .build()
            .with_context(|| match &config_path {
                Some(path) => format!("Failed to load configuration from {}", path.display()),
                None => "Failed to load configuration".to_string(),
            })?;

        loaded
            .try_deserialize::<Config>()
            .context("Invalid configuration")
    }
}

/// Read a boolean environment flag. Unparseable values are ignored.
fn env_flag(name: &str) -> Option<bool> {
    env::var(name).ok().and_then(|value| parse_flag(&value))
}

pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.execution.default_timeout(), Duration::from_secs(5));
        assert!(config.execution.prefer_isolated);
        assert!(!config.execution.force_subprocess);
        assert_eq!(config.isolated.memory_limit_bytes, 64 * 1024 * 1024);
        assert_eq!(config.subprocess.exit_grace(), Duration::from_secs(1));
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("1"), Some(true));
        assert_eq!(parse_flag(" TRUE "), Some(true));
        assert_eq!(parse_flag("off"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn test_file_layer_and_builder_overrides() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[execution]\ndefault_timeout_ms = 750\n\n[isolated]\nmax_stack_bytes = 2048\n"
        )
        .unwrap();

        let config = Config::builder()
            .without_dotenv()
            .config_path(file.path())
            .working_directory("/tmp/scratch")
            .build()
            .unwrap();

        assert_eq!(config.execution.default_timeout_ms, 750);
        assert_eq!(config.isolated.max_stack_bytes, 2048);
        // Untouched keys keep their defaults
        assert_eq!(config.isolated.memory_limit_bytes, 64 * 1024 * 1024);
        assert_eq!(
            config.subprocess.working_directory,
            Some(PathBuf::from("/tmp/scratch"))
        );

        let overridden = Config::builder()
            .without_dotenv()
            .config_path(file.path())
            .default_timeout(Duration::from_millis(20))
            .build()
            .unwrap();
        assert_eq!(overridden.execution.default_timeout_ms, 20);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        assert_err!(Config::builder()
            .without_dotenv()
            .config_path("/definitely/not/here/scratchpad.toml")
            .build());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = Config::default();
        let rendered = assert_ok!(config.to_toml());
        assert!(rendered.contains("[execution]"));
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }
}
