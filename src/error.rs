use std::path::PathBuf;
use thiserror::Error;

/// Fault taxonomy for the whole pipeline. Every stage boundary converts
/// whatever went wrong into one of these kinds before it reaches the
/// orchestrator.
#[derive(Debug, Error)]
pub enum SpindleError {
    #[error("configuration error: {message}")]
    Configuration { message: String, path: Option<PathBuf> },

    #[error("missing dependency '{tool}': {hint}")]
    Dependency { tool: String, hint: String },

    #[error("hardware error: {0}")]
    Hardware(String),

    #[error("media error: {0}")]
    Media(String),

    #[error("{tool} failed: {message}")]
    Tool { tool: String, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("analysis error: {0}")]
    Analysis(String),

    #[error("another spindle instance is already running")]
    AlreadyRunning,
}

impl SpindleError {
    pub fn config(message: impl Into<String>) -> Self {
        SpindleError::Configuration {
            message: message.into(),
            path: None,
        }
    }

    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        SpindleError::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

impl From<rusqlite::Error> for SpindleError {
    fn from(e: rusqlite::Error) -> Self {
        SpindleError::Store(e.to_string())
    }
}

impl From<std::io::Error> for SpindleError {
    fn from(e: std::io::Error) -> Self {
        SpindleError::Filesystem(e.to_string())
    }
}

impl From<reqwest::Error> for SpindleError {
    fn from(e: reqwest::Error) -> Self {
        SpindleError::Network(e.to_string())
    }
}

impl From<serde_json::Error> for SpindleError {
    fn from(e: serde_json::Error) -> Self {
        SpindleError::Store(format!("serialization failed: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, SpindleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_error_message() {
        let err = SpindleError::tool("makemkvcon", "exit code 1");
        assert_eq!(err.to_string(), "makemkvcon failed: exit code 1");
    }

    #[test]
    fn test_io_error_maps_to_filesystem() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: SpindleError = io.into();
        assert!(matches!(err, SpindleError::Filesystem(_)));
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn test_sqlite_error_maps_to_store() {
        let sql = rusqlite::Error::InvalidQuery;
        let err: SpindleError = sql.into();
        assert!(matches!(err, SpindleError::Store(_)));
    }

    #[test]
    fn test_dependency_error_carries_hint() {
        let err = SpindleError::Dependency {
            tool: "drapto".to_string(),
            hint: "install with cargo install drapto".to_string(),
        };
        assert!(err.to_string().contains("drapto"));
        assert!(err.to_string().contains("cargo install"));
    }
}
