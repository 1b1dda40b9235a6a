//! Minimal configuration loading for vigil.
//!
//! This crate provides configuration loading with minimal dependencies so
//! that the core crate, the CLI, and tests can all share it.
//!
//! # Usage
//!
//! ```rust,no_run
//! use vigilconf::VigilConfig;
//!
//! let config = VigilConfig::load().expect("Failed to load config");
//!
//! println!("Output dir: {}", config.paths.output_dir.display());
//! println!("Video polls every {}s", config.polling.video.interval_secs);
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/vigil/config.toml` (system)
//! 2. `~/.config/vigil/config.toml` (user)
//! 3. `./vigil.toml` (local override, or the path given on the CLI)
//! 4. Environment variables (`VIGIL_*`)
//!
//! Files may be partial; anything not set keeps its compiled default.
//!
//! # Example Config
//!
//! ```toml
//! [paths]
//! output_dir = "~/Videos/vigil"
//!
//! [remote]
//! base_url = "https://generativelanguage.googleapis.com/v1beta"
//! api_key_env = "GEMINI_API_KEY"
//!
//! [polling.video]
//! interval_secs = 10
//! max_attempts = 60
//!
//! [polling.research]
//! interval_secs = 30
//! max_attempts = 180
//!
//! [telemetry]
//! otlp_endpoint = "127.0.0.1:4317"
//! log_level = "info"
//! ```

pub mod infra;
pub mod loader;
pub mod polling;

pub use infra::{PathsConfig, RemoteConfig, TelemetryConfig};
pub use loader::{discover_config_files_with_override, ConfigSources};
pub use polling::{PollBudget, PollingConfig};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Failed to build configuration: {0}")]
    Build(String),
}

/// Complete vigil configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct VigilConfig {
    /// Where artifacts land.
    #[serde(default)]
    pub paths: PathsConfig,

    /// Remote service endpoints.
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Per-kind polling budgets.
    #[serde(default)]
    pub polling: PollingConfig,

    /// Logging and OTLP export.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl VigilConfig {
    /// Load configuration from all sources.
    ///
    /// Load order (later wins):
    /// 1. Compiled defaults
    /// 2. `/etc/vigil/config.toml`
    /// 3. `~/.config/vigil/config.toml`
    /// 4. `./vigil.toml`
    /// 5. Environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration from a specific file path, then apply env overrides.
    ///
    /// If `config_path` is provided, it takes precedence over the local
    /// `./vigil.toml` override. System and user configs still load first.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut table = loader::defaults_table()?;

        for path in loader::discover_config_files_with_override(config_path) {
            let file_table = loader::read_table(&path)?;
            loader::merge_tables(&mut table, file_table);
            sources.files.push(path);
        }

        let mut config = loader::finish(table, None)?;
        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        // Build TOML manually for nicer formatting
        let mut output = String::new();

        output.push_str("# vigil configuration\n\n");

        output.push_str("[paths]\n");
        output.push_str(&format!(
            "output_dir = \"{}\"\n",
            self.paths.output_dir.display()
        ));

        output.push_str("\n[remote]\n");
        output.push_str(&format!("base_url = \"{}\"\n", self.remote.base_url));
        output.push_str(&format!("api_key_env = \"{}\"\n", self.remote.api_key_env));
        output.push_str(&format!(
            "request_timeout_ms = {}\n",
            self.remote.request_timeout_ms
        ));
        output.push_str(&format!("video_model = \"{}\"\n", self.remote.video_model));
        output.push_str(&format!(
            "research_agent = \"{}\"\n",
            self.remote.research_agent
        ));

        for (name, budget) in [
            ("video", &self.polling.video),
            ("research", &self.polling.research),
        ] {
            output.push_str(&format!("\n[polling.{}]\n", name));
            output.push_str(&format!("interval_secs = {}\n", budget.interval_secs));
            output.push_str(&format!("max_attempts = {}\n", budget.max_attempts));
        }

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!(
            "otlp_endpoint = \"{}\"\n",
            self.telemetry.otlp_endpoint
        ));
        output.push_str(&format!(
            "log_level = \"{}\"\n",
            self.telemetry.log_level
        ));

        output
    }
}
