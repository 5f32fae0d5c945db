//! Error types for the imgsrv derivative pipeline.
//!
//! Errors are organized by layer so callers (the HTTP surface in particular)
//! can map them to a response without inspecting message strings.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for imgsrv operations.
#[derive(Error, Debug)]
pub enum ImgSrvError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Derivative computation and coordination errors
    #[error("Derive error: {0}")]
    Derive(#[from] DeriveError),

    /// General I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the config file from disk
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse TOML configuration
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Configuration values are invalid
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Errors raised while serving a derivative request.
#[derive(Error, Debug)]
pub enum DeriveError {
    /// Malformed polygon, rotation, size or source id. Rejected before any
    /// coordination takes place.
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// No metadata exists for the requested source id
    #[error("Source not found: {0}")]
    SourceNotFound(String),

    /// The image backend rejected a pipeline step
    #[error("Transform failed at {step}: {message}")]
    TransformFailure { step: String, message: String },

    /// A release was observed but the owner never wrote the artifact
    #[error("Coordinator defect: {identity} was released without an artifact")]
    CoordinatorDefect { identity: String },

    /// The coordinator task or connection is gone
    #[error("Coordinator unavailable: {0}")]
    CoordinatorUnavailable(String),

    /// Image decoding failed
    #[error("Decode error for {path}: {message}")]
    Decode { path: PathBuf, message: String },

    /// Image encoding failed
    #[error("Encode error ({format}): {message}")]
    Encode { format: String, message: String },

    /// Unsupported image format
    #[error("Unsupported format for {path}: {format}")]
    UnsupportedFormat { path: PathBuf, format: String },

    /// File exceeds size limit
    #[error("File too large: {path} ({size_mb}MB > {max_mb}MB)")]
    FileTooLarge {
        path: PathBuf,
        size_mb: u64,
        max_mb: u64,
    },

    /// Image dimensions exceed limit
    #[error("Image too large: {path} ({width}x{height} > {max_dim})")]
    ImageTooLarge {
        path: PathBuf,
        width: u32,
        height: u32,
        max_dim: u32,
    },

    /// Operation timed out
    #[error("Timeout in {stage} stage after {timeout_ms}ms")]
    Timeout { stage: String, timeout_ms: u64 },

    /// Reading or writing the source/artifact store failed
    #[error("Storage error for {path}: {message}")]
    Storage { path: PathBuf, message: String },

    /// Downloading a source from its origin failed
    #[error("Fetch failed for {url}: {message}")]
    Fetch { url: String, message: String },
}

impl DeriveError {
    /// Wrap an I/O error with the path it concerns.
    pub fn storage(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::Storage {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// Build a transform failure for the named pipeline step.
    pub fn transform(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TransformFailure {
            step: step.into(),
            message: message.into(),
        }
    }
}

/// Convenience type alias for imgsrv results.
pub type Result<T> = std::result::Result<T, ImgSrvError>;

/// Convenience type alias for derive-specific results.
pub type DeriveResult<T> = std::result::Result<T, DeriveError>;
