use std::path::PathBuf;

use thiserror::Error;

/// Every failure the launcher can surface, grouped the way the sync and
/// launch paths react to them.
#[derive(Debug, Error)]
pub enum LauncherError {
    /// Transport failure, timeout, or non-success status.
    #[error("request to {url} failed: {message}")]
    Network { url: String, message: String },

    /// Malformed manifest, version profile, or config file.
    #[error("parse error: {0}")]
    Parse(String),

    /// Local read, write, or delete failure.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Downloaded bytes do not hash to the value the manifest declared.
    #[error("{name} failed verification: expected {expected}, got {actual}")]
    Integrity {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("enter a player name before launching")]
    AuthInput,

    #[error("launch failed: {0}")]
    Launch(String),
}

impl LauncherError {
    pub(crate) fn network(url: &str, message: impl ToString) -> Self {
        LauncherError::Network {
            url: url.to_owned(),
            message: message.to_string(),
        }
    }
}

/// Convenience constructor for [`LauncherError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> LauncherError {
    LauncherError::Io {
        path: path.into(),
        source,
    }
}
