//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, PollBudget, VigilConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli).
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/vigil/config.toml");
    if system.exists() {
        files.push(system);
    }

    // User config (XDG_CONFIG_HOME or ~/.config)
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("vigil/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    // CLI override takes precedence over local
    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("vigil.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Compiled defaults as a TOML table, the base every file is merged onto.
pub(crate) fn defaults_table() -> Result<toml::Table, ConfigError> {
    match toml::Value::try_from(VigilConfig::default()) {
        Ok(toml::Value::Table(table)) => Ok(table),
        Ok(other) => Err(ConfigError::Build(format!(
            "defaults serialized to {} instead of a table",
            other.type_str()
        ))),
        Err(e) => Err(ConfigError::Build(e.to_string())),
    }
}

/// Read a TOML file into a raw table.
pub(crate) fn read_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    contents
        .parse::<toml::Table>()
        .map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Recursively merge `overlay` into `base`. Nested tables merge key by key;
/// any other value in `overlay` replaces the one in `base`.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Turn a fully merged table into a typed config.
pub(crate) fn finish(table: toml::Table, path: Option<&Path>) -> Result<VigilConfig, ConfigError> {
    let mut config: VigilConfig = toml::Value::Table(table).try_into().map_err(
        |e: toml::de::Error| match path {
            Some(path) => ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            },
            None => ConfigError::Build(e.to_string()),
        },
    )?;

    config.paths.output_dir = expand_path(&config.paths.output_dir.to_string_lossy());
    Ok(config)
}

/// Load a single config file on top of the compiled defaults.
pub fn load_from_file(path: &Path) -> Result<VigilConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_toml(&contents, path)
}

/// Parse config from a TOML string, layered over the compiled defaults.
fn parse_toml(contents: &str, path: &Path) -> Result<VigilConfig, ConfigError> {
    let overlay: toml::Table = contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut table = defaults_table()?;
    merge_tables(&mut table, overlay);
    finish(table, Some(path))
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut VigilConfig, sources: &mut ConfigSources) {
    if let Ok(v) = env::var("VIGIL_OUTPUT_DIR") {
        config.paths.output_dir = expand_path(&v);
        sources.env_overrides.push("VIGIL_OUTPUT_DIR".to_string());
    }

    // Remote service
    if let Ok(v) = env::var("VIGIL_BASE_URL") {
        config.remote.base_url = v;
        sources.env_overrides.push("VIGIL_BASE_URL".to_string());
    }
    if let Ok(v) = env::var("VIGIL_API_KEY_ENV") {
        config.remote.api_key_env = v;
        sources.env_overrides.push("VIGIL_API_KEY_ENV".to_string());
    }
    if let Ok(v) = env::var("VIGIL_VIDEO_MODEL") {
        config.remote.video_model = v;
        sources.env_overrides.push("VIGIL_VIDEO_MODEL".to_string());
    }
    if let Ok(v) = env::var("VIGIL_RESEARCH_AGENT") {
        config.remote.research_agent = v;
        sources.env_overrides.push("VIGIL_RESEARCH_AGENT".to_string());
    }

    // Polling budgets
    override_budget(&mut config.polling.video, "VIDEO", sources);
    override_budget(&mut config.polling.research, "RESEARCH", sources);

    // Telemetry
    if let Ok(v) = env::var("VIGIL_OTLP_ENDPOINT") {
        config.telemetry.otlp_endpoint = v;
        sources.env_overrides.push("VIGIL_OTLP_ENDPOINT".to_string());
    }
    // Also support standard OTEL env var
    if let Ok(v) = env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        config.telemetry.otlp_endpoint = v;
        sources.env_overrides.push("OTEL_EXPORTER_OTLP_ENDPOINT".to_string());
    }
    if let Ok(v) = env::var("VIGIL_LOG_LEVEL") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("VIGIL_LOG_LEVEL".to_string());
    }
    // Also support RUST_LOG
    if let Ok(v) = env::var("RUST_LOG") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }
}

fn override_budget(budget: &mut PollBudget, kind: &str, sources: &mut ConfigSources) {
    let interval_key = format!("VIGIL_{}_INTERVAL_SECS", kind);
    if let Some(secs) = env::var(&interval_key).ok().and_then(|v| v.parse().ok()) {
        budget.interval_secs = secs;
        sources.env_overrides.push(interval_key);
    }

    let attempts_key = format!("VIGIL_{}_MAX_ATTEMPTS", kind);
    if let Some(attempts) = env::var(&attempts_key).ok().and_then(|v| v.parse().ok()) {
        budget.max_attempts = attempts;
        sources.env_overrides.push(attempts_key);
    }
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            home.join(stripped)
        } else {
            PathBuf::from(path)
        }
    } else if let Some(stripped) = path.strip_prefix('$') {
        // Handle $VAR/rest/of/path
        if let Some(slash_pos) = stripped.find('/') {
            let var_name = &stripped[..slash_pos];
            if let Ok(var_value) = env::var(var_name) {
                PathBuf::from(var_value).join(&stripped[slash_pos + 1..])
            } else {
                PathBuf::from(path)
            }
        } else {
            env::var(stripped)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(path))
        }
    } else {
        PathBuf::from(path)
    }
}
