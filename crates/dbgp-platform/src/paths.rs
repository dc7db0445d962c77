use std::path::{Path, PathBuf};

use crate::error::PlatformError;

/// Name of the log file inside [`PlatformPaths::log_dir`].
pub const LOG_FILE_NAME: &str = "dbgp.log";

/// Directories the client reads config from and writes logs to.
pub trait PlatformPaths: Send + Sync {
    /// Configuration directory (`~/.config/dbgp`).
    fn config_dir(&self) -> PathBuf;
    /// Data directory (`~/.local/share/dbgp`).
    fn data_dir(&self) -> PathBuf;
    /// Log directory (`<data_dir>/logs`).
    fn log_dir(&self) -> PathBuf {
        self.data_dir().join("logs")
    }
    /// Full path of the log file.
    fn log_file(&self) -> PathBuf {
        self.log_dir().join(LOG_FILE_NAME)
    }
    /// The user's home directory.
    fn home_dir(&self) -> PathBuf;
}

/// [`PlatformPaths`] rooted at the user's home directory.
#[derive(Debug, Clone)]
pub struct DefaultPaths {
    home: PathBuf,
}

impl DefaultPaths {
    /// Resolve the home directory via `dirs`, falling back to `$HOME`.
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Path` if no home directory can be found.
    pub fn new() -> Result<Self, PlatformError> {
        let home = dirs::home_dir()
            .or_else(|| std::env::var("HOME").ok().map(PathBuf::from))
            .ok_or_else(|| PlatformError::Path("could not determine home directory".into()))?;
        Ok(Self { home })
    }

    /// Paths rooted at an explicit home directory.
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }
}

impl PlatformPaths for DefaultPaths {
    fn config_dir(&self) -> PathBuf {
        self.home.join(".config").join("dbgp")
    }

    fn data_dir(&self) -> PathBuf {
        self.home.join(".local").join("share").join("dbgp")
    }

    fn home_dir(&self) -> PathBuf {
        self.home.clone()
    }
}

/// Create `dir` and its parents if missing.
pub fn ensure_dir(dir: &Path) -> Result<(), PlatformError> {
    if dir.is_dir() {
        return Ok(());
    }
    tracing::debug!(path = %dir.display(), "creating directory");
    std::fs::create_dir_all(dir).map_err(|source| PlatformError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })
}
