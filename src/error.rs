use std::path::PathBuf;

use thiserror::Error;

/// Errors that abort a scan run.
///
/// Per-file problems (an entry whose bytes cannot be read out of a layer)
/// are not represented here; they degrade to skip records on the result set.
#[derive(Error, Debug)]
pub enum ScanError {
    /// The archive is not a usable `docker save` output: missing or
    /// unparsable manifest/config, or inconsistent layer metadata.
    #[error("invalid docker archive: {0}")]
    MalformedArchive(String),

    /// The detection engine could not be reached or returned garbage.
    /// Nothing from the in-flight layer is cached when this happens.
    #[error("secret detection engine unavailable: {0}")]
    EngineUnavailable(String),

    /// An external tool (the `docker` CLI) failed or timed out.
    #[error("command `{command}` failed: {reason}")]
    ExternalToolFailure { command: String, reason: String },

    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid exclusion pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

impl ScanError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        ScanError::MalformedArchive(msg.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ScanError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;
