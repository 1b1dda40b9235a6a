//! Infrastructure configuration - things that cannot change at runtime.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Filesystem paths for vigil output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory where materialized artifacts (videos, reports) are written.
    /// Created on first use if it does not exist.
    /// Default: ~/.local/share/vigil/output
    #[serde(default = "PathsConfig::default_output_dir")]
    pub output_dir: PathBuf,
}

impl PathsConfig {
    fn default_output_dir() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".local/share/vigil/output"))
            .unwrap_or_else(|| PathBuf::from(".local/share/vigil/output"))
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            output_dir: Self::default_output_dir(),
        }
    }
}

/// Remote generative service endpoints and credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the REST API.
    /// Default: https://generativelanguage.googleapis.com/v1beta
    #[serde(default = "RemoteConfig::default_base_url")]
    pub base_url: String,

    /// Name of the environment variable holding the API key.
    /// The key itself never lives in a config file.
    /// Default: GEMINI_API_KEY
    #[serde(default = "RemoteConfig::default_api_key_env")]
    pub api_key_env: String,

    /// Per-request HTTP timeout in milliseconds.
    /// Default: 60000
    #[serde(default = "RemoteConfig::default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Model used for video render jobs.
    #[serde(default = "RemoteConfig::default_video_model")]
    pub video_model: String,

    /// Agent used for research jobs.
    #[serde(default = "RemoteConfig::default_research_agent")]
    pub research_agent: String,
}

impl RemoteConfig {
    fn default_base_url() -> String {
        "https://generativelanguage.googleapis.com/v1beta".to_string()
    }

    fn default_api_key_env() -> String {
        "GEMINI_API_KEY".to_string()
    }

    fn default_request_timeout_ms() -> u64 {
        60_000
    }

    fn default_video_model() -> String {
        "veo-3.0-generate-001".to_string()
    }

    fn default_research_agent() -> String {
        "deep-research-pro-preview-12-2025".to_string()
    }

    /// Read the API key from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: Self::default_base_url(),
            api_key_env: Self::default_api_key_env(),
            request_timeout_ms: Self::default_request_timeout_ms(),
            video_model: Self::default_video_model(),
            research_agent: Self::default_research_agent(),
        }
    }
}

/// Telemetry and observability configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// OTLP gRPC endpoint for OpenTelemetry. Empty disables export.
    /// Default: "" (disabled)
    #[serde(default)]
    pub otlp_endpoint: String,

    /// Log level / EnvFilter directive (trace, debug, info, warn, error).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }

    /// Whether OTLP export should be enabled.
    pub fn otlp_enabled(&self) -> bool {
        !self.otlp_endpoint.trim().is_empty()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: String::new(),
            log_level: Self::default_log_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_defaults() {
        let paths = PathsConfig::default();
        assert!(paths.output_dir.to_string_lossy().contains("vigil"));
    }

    #[test]
    fn test_remote_defaults() {
        let remote = RemoteConfig::default();
        assert!(remote.base_url.starts_with("https://"));
        assert_eq!(remote.api_key_env, "GEMINI_API_KEY");
        assert_eq!(remote.request_timeout_ms, 60_000);
    }

    #[test]
    fn test_telemetry_defaults() {
        let telemetry = TelemetryConfig::default();
        assert!(!telemetry.otlp_enabled());
        assert_eq!(telemetry.log_level, "info");
    }

    #[test]
    fn test_api_key_from_unset_variable() {
        let remote = RemoteConfig {
            api_key_env: "VIGIL_TEST_SURELY_UNSET_KEY".to_string(),
            ..Default::default()
        };
        assert_eq!(remote.api_key(), None);
    }
}
