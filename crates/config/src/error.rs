use std::{
    io,
    path::{Path, PathBuf},
};

/// Errors that can occur when loading, saving or validating a project
/// configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Provides path context for a failed configuration read.
    #[error("failed to read config file {path:?}: {source}")]
    Read { source: io::Error, path: PathBuf },
    /// Provides path context for a failed configuration write.
    #[error("failed to write config file {path:?}: {source}")]
    Write { source: io::Error, path: PathBuf },
    /// Provides path context for a configuration that is not valid JSON.
    #[error("failed to parse config file {path:?}: {source}")]
    Parse { source: serde_json::Error, path: PathBuf },
    /// The configuration parsed but violates a documented requirement.
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl ConfigError {
    pub(crate) fn read(source: io::Error, path: impl AsRef<Path>) -> Self {
        Self::Read { source, path: path.as_ref().to_path_buf() }
    }

    pub(crate) fn write(source: io::Error, path: impl AsRef<Path>) -> Self {
        Self::Write { source, path: path.as_ref().to_path_buf() }
    }

    pub(crate) fn parse(source: serde_json::Error, path: impl AsRef<Path>) -> Self {
        Self::Parse { source, path: path.as_ref().to_path_buf() }
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
