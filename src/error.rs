//! Error types for cubekit

use std::fmt;
use std::io;

/// Result type for cubekit operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in cubekit operations
#[derive(Debug)]
pub enum Error {
    /// I/O error from a file loader or catalog reader
    Io(io::Error),

    /// Malformed input data (catalog file, compressed stream header)
    InvalidFormat(String),

    /// Rejected request parameter (bad frame range, zero capacity, unknown column)
    InvalidParameter(String),

    /// A referenced resource does not exist (file, tile off-image)
    ResourceMissing(String),

    /// Compressor or decoder rejected a stream
    DecodeFailure(String),

    /// Out of bounds access
    OutOfBounds(String),

    /// Work was cancelled; not reported to the client
    Cancelled,

    /// Internal consistency violation
    Invariant(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::InvalidFormat(msg) => write!(f, "Invalid format: {}", msg),
            Error::InvalidParameter(msg) => write!(f, "Invalid parameter: {}", msg),
            Error::ResourceMissing(msg) => write!(f, "Resource missing: {}", msg),
            Error::DecodeFailure(msg) => write!(f, "Decode failure: {}", msg),
            Error::OutOfBounds(msg) => write!(f, "Out of bounds: {}", msg),
            Error::Cancelled => write!(f, "Cancelled"),
            Error::Invariant(msg) => write!(f, "Invariant violation: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        Error::Io(error)
    }
}
