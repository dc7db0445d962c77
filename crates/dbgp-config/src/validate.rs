use crate::config::Config;
use crate::error::ConfigError;

const MAX_TIMEOUT_SECS: u64 = 3600;

/// Check a [`Config`] and return every violation found.
pub fn validate(config: &Config) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut reject = |field: &str, message: String| {
        errors.push(ConfigError::Validation {
            field: field.to_string(),
            message,
        });
    };

    if config.listen.host.trim().is_empty() {
        reject("listen.host", "must not be empty".to_string());
    }
    if config.listen.port == 0 {
        reject("listen.port", "must not be 0".to_string());
    }

    if config.session.ide_key.trim().is_empty() {
        reject("session.ide_key", "must not be empty".to_string());
    }
    let timeout = config.session.command_timeout_secs;
    if timeout == 0 || timeout > MAX_TIMEOUT_SECS {
        reject(
            "session.command_timeout_secs",
            format!("must be between 1 and {MAX_TIMEOUT_SECS}, got {timeout}"),
        );
    }

    if config.features.max_children == 0 {
        reject("features.max_children", "must be at least 1".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
