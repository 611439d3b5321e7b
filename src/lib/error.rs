use std::{io, path::PathBuf};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LeadError>;

#[derive(Debug, Error)]
pub enum LeadError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("corrupt file {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },
    #[error("validation error: {0}")]
    Validation(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("collaborator error: {0}")]
    Collaborator(String),
}

impl LeadError {
    /// True for failures that may succeed on retry (permissions, missing
    /// directories, full disk).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

impl From<toml::de::Error> for LeadError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for LeadError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for LeadError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<csv::Error> for LeadError {
    fn from(err: csv::Error) -> Self {
        if err.is_io_error() {
            match err.into_kind() {
                csv::ErrorKind::Io(io_err) => Self::Io(io_err),
                other => Self::Serialization(format!("{other:?}")),
            }
        } else {
            Self::Serialization(err.to_string())
        }
    }
}
