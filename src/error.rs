//! Error types for the TSN driver.

use std::io;
use thiserror::Error;

use crate::config::ConfigError;

/// Result type for driver operations.
pub type Result<T> = std::result::Result<T, TsnError>;

/// Errors that can occur in driver operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TsnError {
    /// Device operation failed
    #[error("Device operation failed: {0}")]
    DeviceError(String),

    /// Invalid input parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource exhausted
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Frame rejected by the classifier
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Timeout error
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl TsnError {
    /// Convert to an appropriate errno value for FFI
    #[inline]
    #[must_use]
    #[allow(clippy::wildcard_enum_match_arm)]
    pub fn to_errno(&self) -> i32 {
        match *self {
            TsnError::InvalidInput(_) => libc::EINVAL,
            TsnError::ResourceExhausted(_) => libc::ENOSPC,
            TsnError::InvalidFrame(_) => libc::EBADMSG,
            TsnError::Timeout(_) => libc::ETIMEDOUT,
            TsnError::IoError(ref e) => e.raw_os_error().unwrap_or(libc::EIO),
            _ => libc::EIO,
        }
    }
}
