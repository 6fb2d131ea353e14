//! Error taxonomy shared across the loader, micro-kernel engine, and device
//! layer.
//!
//! All loading and validation failures are returned as typed errors before
//! any memory mapping or foreign-code side effect. Crashes *inside* loaded
//! foreign code are out of this crate's recovery contract (see
//! [`crate::loader::library`]).

use thiserror::Error;

/// Errors produced by this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed image bytes: bad magic, truncated tables, out-of-bounds
    /// segment ranges, writable+executable segments.
    #[error("invalid image format: {0}")]
    InvalidFormat(String),

    /// The image targets an architecture this runtime was not compiled for,
    /// or carries an unknown architecture tag.
    #[error("unsupported architecture: {0}")]
    UnsupportedArchitecture(String),

    /// A relocation entry is unpaired, unresolvable, or its value does not
    /// fit the encoding.
    #[error("malformed relocation: {0}")]
    MalformedRelocation(String),

    /// A mapping or scratch-buffer limit was exceeded.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Kernel-parameter or configuration validation failure.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Entry-point or queue lookup miss.
    #[error("not found: {0}")]
    NotFound(String),

    /// A bounded wait elapsed before its condition was met. Distinct from
    /// permanent failure: retrying with a longer deadline may succeed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Unrecoverable failure: a poisoned semaphore timeline or a failure
    /// reported from inside loaded foreign code.
    #[error("fatal: {0}")]
    Fatal(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_context() {
        let e = Error::InvalidFormat("bad magic".to_string());
        assert_eq!(e.to_string(), "invalid image format: bad magic");
        let e = Error::DeadlineExceeded;
        assert_eq!(e.to_string(), "deadline exceeded");
    }
}
