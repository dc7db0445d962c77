use thiserror::Error;

/// Errors resolving or preparing platform directories.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("path error: {0}")]
    Path(String),

    #[error("could not create directory {path}: {source}")]
    CreateDir {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_error_display_contains_message() {
        let err = PlatformError::Path("no home".into());
        assert_eq!(err.to_string(), "path error: no home");
    }

    #[test]
    fn create_dir_error_names_path() {
        let err = PlatformError::CreateDir {
            path: "/nope/logs".into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let msg = err.to_string();
        assert!(msg.contains("/nope/logs"));
        assert!(msg.contains("denied"));
    }
}
