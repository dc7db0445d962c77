use std::path::{Path, PathBuf};

use dbgp_platform::{DefaultPaths, PlatformPaths};

use crate::config::Config;
use crate::error::ConfigError;
use crate::merge::merge_configs;
use crate::validate::validate;

const CONFIG_FILE: &str = "config.toml";
const PROJECT_DIR: &str = ".dbgp";

/// Written to a fresh global config so users can see what is tunable.
const DEFAULT_CONFIG_CONTENT: &str = r#"# dbgp configuration
# Uncomment and edit settings below to override defaults.

# [listen]
# host = "127.0.0.1"
# port = 9000

# [session]
# ide_key = "dbgp"
# break_on_first_line = true
# command_timeout_secs = 10
# continuation_timeout_secs = 0

# [features]
# max_depth = 0
# max_data = 1024
# max_children = 150

# [log]
# level = "info"
# file = "/tmp/dbgp.log"
"#;

/// Load configuration from the user's standard config directory, with
/// an optional project override.
pub fn load_default(project_dir: Option<&Path>) -> Result<Config, ConfigError> {
    let paths = DefaultPaths::new()?;
    load_config(&paths.config_dir(), project_dir)
}

/// Load and merge configuration.
///
/// `Config::default()` is overlaid with `config_dir/config.toml`, which is
/// created with commented-out defaults when missing, then with the first
/// `.dbgp/config.toml` found walking up from `project_dir`. The result is
/// validated. A `project_dir` that does not exist is `NotFound`.
pub fn load_config(config_dir: &Path, project_dir: Option<&Path>) -> Result<Config, ConfigError> {
    if let Some(dir) = project_dir.filter(|d| !d.exists()) {
        return Err(ConfigError::NotFound(dir.to_path_buf()));
    }
    let global_path = config_dir.join(CONFIG_FILE);

    if !config_dir.exists() {
        std::fs::create_dir_all(config_dir)?;
    }
    if !global_path.exists() {
        std::fs::write(&global_path, DEFAULT_CONFIG_CONTENT)
            .map_err(|e| ConfigError::CreateDefault(e.to_string()))?;
        tracing::info!(path = %global_path.display(), "created default config");
    }

    let mut config = Config::default();

    let global_content = std::fs::read_to_string(&global_path)?;
    if has_non_comment_content(&global_content) {
        config = merge_configs(&config, &global_content)?;
    }

    if let Some(project_path) = project_dir.and_then(find_project_config) {
        tracing::debug!(path = %project_path.display(), "applying project config");
        let project_content = std::fs::read_to_string(&project_path)?;
        config = merge_configs(&config, &project_content)?;
    }

    first_violation(&config)?;
    Ok(config)
}

/// Parse a TOML string into a validated [`Config`] without touching disk.
pub fn load_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;
    first_violation(&config)?;
    Ok(config)
}

fn first_violation(config: &Config) -> Result<(), ConfigError> {
    validate(config).map_err(|errors| {
        for e in &errors {
            tracing::warn!(error = %e, "invalid configuration");
        }
        errors
            .into_iter()
            .next()
            .unwrap_or_else(|| ConfigError::Validation {
                field: "unknown".to_string(),
                message: "validation failed".to_string(),
            })
    })
}

/// Walk from `start` upward looking for `.dbgp/config.toml`.
fn find_project_config(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(PROJECT_DIR).join(CONFIG_FILE))
        .find(|candidate| candidate.is_file())
}

fn has_non_comment_content(content: &str) -> bool {
    content.lines().any(|l| {
        let trimmed = l.trim();
        !trimmed.is_empty() && !trimmed.starts_with('#')
    })
}
