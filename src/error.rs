// src/error.rs

//! Error types for the airlock pipeline
//!
//! Every verification failure maps to exactly one variant so operators can tell
//! "corrupted in transit" (`ChecksumMismatch`) from "tampered or wrong signer"
//! (`SignatureInvalid`) from "incomplete media" (`BundleStructureInvalid`).

use std::path::PathBuf;
use thiserror::Error;

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A file under a content tree could not be read while building a BOM
    #[error("content tree unreadable at {path}: {reason}")]
    TreeUnreadable { path: PathBuf, reason: String },

    /// Whole-archive or per-file checksum disagreement
    #[error("checksum mismatch in {subject}: {}", .paths.join(", "))]
    ChecksumMismatch { subject: String, paths: Vec<String> },

    /// Missing/untrusted key, corrupted signature, or tampered content
    #[error("signature invalid: {0}")]
    SignatureInvalid(String),

    /// One of the required bundle artifacts is missing or malformed
    #[error("bundle '{bundle}' is structurally invalid: {reason}")]
    BundleStructureInvalid { bundle: String, reason: String },

    #[error("channel not found: {0}")]
    ChannelNotFound(String),

    #[error("channel already exists: {0}")]
    ChannelExists(String),

    #[error("channel '{0}' has no published content")]
    ChannelEmpty(String),

    /// Request that makes no sense for the current channel state
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("archive '{archive}' not found in channel '{channel}'")]
    ArchiveNotFound { channel: String, archive: String },

    /// Another writer holds the channel lock
    #[error("channel '{channel}' is locked by another operation{}", .holder.map(|p| format!(" (pid {})", p)).unwrap_or_default())]
    PromotionConflict { channel: String, holder: Option<u32> },

    /// Malformed epoch:version-release string
    #[error("invalid version '{input}': {reason}")]
    VersionParseError { input: String, reason: String },

    #[error("bundle already exists: {0}")]
    BundleExists(String),

    #[error("invalid name '{0}': only ASCII letters, digits, '.', '_' and '-' are allowed")]
    InvalidName(String),

    #[error("key error: {0}")]
    KeyError(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("manifest error: {0}")]
    ManifestError(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("parse error: {0}")]
    ParseError(String),
}

impl Error {
    /// Short, stable name of the check that produced this error
    pub fn check(&self) -> &'static str {
        match self {
            Self::TreeUnreadable { .. } => "tree",
            Self::ChecksumMismatch { .. } => "checksum",
            Self::SignatureInvalid(_) => "signature",
            Self::BundleStructureInvalid { .. } => "structure",
            Self::ChannelNotFound(_)
            | Self::ChannelExists(_)
            | Self::ChannelEmpty(_)
            | Self::InvalidOperation(_)
            | Self::ArchiveNotFound { .. } => "channel",
            Self::PromotionConflict { .. } => "lock",
            Self::VersionParseError { .. } => "version",
            Self::BundleExists(_) | Self::InvalidName(_) => "name",
            Self::KeyError(_) => "key",
            Self::ConfigError(_) => "config",
            Self::ManifestError(_) => "manifest",
            Self::IoError(_) => "io",
            Self::ParseError(_) => "parse",
        }
    }

    /// Paths implicated by the error, if any
    pub fn paths(&self) -> Vec<String> {
        match self {
            Self::ChecksumMismatch { paths, .. } => paths.clone(),
            Self::TreeUnreadable { path, .. } => vec![path.display().to_string()],
            _ => Vec::new(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::ParseError(err.to_string())
    }
}

impl From<walkdir::Error> for Error {
    fn from(err: walkdir::Error) -> Self {
        let path = err.path().map(|p| p.to_path_buf()).unwrap_or_default();
        Self::TreeUnreadable {
            path,
            reason: err.to_string(),
        }
    }
}

/// Validate a bundle, channel or archive name
///
/// Names become path components, so anything that could escape a directory
/// (separators, `..`, leading dots) is refused.
pub fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidName(name.to_string()))
    }
}
