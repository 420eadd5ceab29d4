//! ZKB-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::exec::ExecError;
use crate::session::SessionError;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, BeaconError>;

/// Top-level error type for zkbeacon.
#[derive(Debug, Error)]
pub enum BeaconError {
    #[error("[ZKB-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[ZKB-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[ZKB-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[ZKB-2001] cannot establish a session to {endpoint}: {details}")]
    Connect { endpoint: String, details: String },

    #[error("[ZKB-2002] coordination failure during {op} on {path}: {source}")]
    Session {
        op: &'static str,
        path: String,
        #[source]
        source: SessionError,
    },

    #[error("[ZKB-2003] snapshot walk failed at {path}: {details}")]
    Snapshot { path: String, details: String },

    #[error("[ZKB-3001] {0}")]
    Exec(#[from] ExecError),

    #[error("[ZKB-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[ZKB-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl BeaconError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "ZKB-1001",
            Self::MissingConfig { .. } => "ZKB-1002",
            Self::ConfigParse { .. } => "ZKB-1003",
            Self::Connect { .. } => "ZKB-2001",
            Self::Session { .. } => "ZKB-2002",
            Self::Snapshot { .. } => "ZKB-2003",
            Self::Exec(_) => "ZKB-3001",
            Self::Io { .. } => "ZKB-3002",
            Self::Runtime { .. } => "ZKB-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Session { .. } | Self::Io { .. } | Self::Exec(_) | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Convenience constructor for fatal coordination-service failures.
    #[must_use]
    pub fn session(op: &'static str, path: impl Into<String>, source: SessionError) -> Self {
        Self::Session {
            op,
            path: path.into(),
            source,
        }
    }
}

impl From<toml::de::Error> for BeaconError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
