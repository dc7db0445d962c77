use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// A path handed to the loader does not exist.
    #[error("no such path: {}", .0.display())]
    NotFound(PathBuf),

    /// Writing the commented default config failed.
    #[error("cannot write default config: {0}")]
    CreateDefault(String),

    #[error("invalid TOML: {0}")]
    Parse(String),

    /// A setting is out of range.
    #[error("{field}: {message}")]
    Validation { field: String, message: String },

    #[error(transparent)]
    Platform(#[from] dbgp_platform::PlatformError),

    #[error("config I/O: {0}")]
    Io(#[from] std::io::Error),
}
