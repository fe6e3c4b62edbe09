use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Structural parse error at line {line}: {message}")]
    Parse {
        line: usize,
        message: String,
    },

    #[error("Cannot analyze {path}: {message}")]
    FileAccess {
        path: String,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ScanError {
    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }

    pub fn file_access(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FileAccess {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn config_error(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Converts an engine-level failure into the record attached to a file report.
    pub fn into_file_error(self, path: &str) -> FileError {
        match self {
            ScanError::Parse { line, message } => FileError {
                path: path.to_string(),
                kind: FileErrorKind::Parse,
                line: Some(line),
                message,
            },
            ScanError::FileAccess { message, .. } => FileError {
                path: path.to_string(),
                kind: FileErrorKind::Access,
                line: None,
                message,
            },
            other => FileError {
                path: path.to_string(),
                kind: FileErrorKind::Access,
                line: None,
                message: other.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileErrorKind {
    Parse,
    Access,
}

/// A file that could not be turned into a usable source model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileError {
    pub path: String,
    pub kind: FileErrorKind,
    pub line: Option<usize>,
    pub message: String,
}

impl std::fmt::Display for FileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{}: {}", self.path, line, self.message),
            None => write!(f, "{}: {}", self.path, self.message),
        }
    }
}
