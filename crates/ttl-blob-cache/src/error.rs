//! Error types for the TTL blob cache

use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub enum CacheError {
    Io(Box<std::io::Error>),
    /// The cache root could not be deleted or recreated.
    Structural {
        path: PathBuf,
        source: Box<std::io::Error>,
    },
    Config(String),
}

impl CacheError {
    pub(crate) fn structural(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        CacheError::Structural {
            path: path.into(),
            source: Box::new(err),
        }
    }
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Io(err) => write!(f, "IO error: {}", err),
            CacheError::Structural { path, source } => {
                write!(f, "Cache root {} is unusable: {}", path.display(), source)
            }
            CacheError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Io(err) => Some(err.as_ref()),
            CacheError::Structural { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_config_error_display() {
        let err = CacheError::Config("write_lanes must be at least 1".to_string());
        assert_eq!(
            format!("{}", err),
            "Configuration error: write_lanes must be at least 1"
        );
    }

    #[test]
    fn test_structural_error_has_source() {
        let err = CacheError::structural(
            "/tmp/cache",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(format!("{}", err).contains("/tmp/cache"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: CacheError = io.into();
        assert!(matches!(err, CacheError::Io(_)));
        assert_eq!(format!("{}", err), "IO error: gone");
    }

    #[test]
    fn test_error_is_debug() {
        let debug_str = format!("{:?}", CacheError::Config("bad".to_string()));
        assert!(debug_str.contains("Config"));
    }
}
