//! Platform directories for the dbgp client.

pub mod error;
pub mod paths;

pub use error::PlatformError;
pub use paths::{ensure_dir, DefaultPaths, PlatformPaths, LOG_FILE_NAME};
