//! Crate-wide error types.
//!
//! Each component gets its own `thiserror` enum naming the stable error
//! kinds from the design; [`Error`] composes them into the one type that
//! crosses module boundaries. `#[from]` conversions keep `?` usable
//! throughout without manual wrapping at each call site.

use thiserror::Error;

/// Network Interface failures (§4.1).
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("radio scan unavailable")]
    ScanUnavailable,
    #[error("association with network timed out")]
    AssociationTimeout,
    #[error("authentication with network failed")]
    AuthenticationFailed,
    #[error("network not found: {0}")]
    NetworkNotFound(String),
    #[error("command failed: {0}")]
    CommandFailed(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Device Client failures (§4.2).
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device unreachable: {0}")]
    DeviceUnreachable(String),
    #[error("device request failed with status {0}")]
    DeviceRequestFailed(u16),
    #[error("device requires authentication")]
    AuthRequired,
    #[error("malformed device response: {0}")]
    MalformedResponse(String),
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Manager HTTP Client failures (§4.6).
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("manager unavailable: {0}")]
    ManagerUnavailable(String),
    #[error("manager rejected request with status {0}")]
    ManagerRejected(u16),
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Top-level crate error. Every fallible public operation returns
/// `crate::Result<T>` built on this type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("radio lock busy")]
    RadioBusy,

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Manager(#[from] ManagerError),

    #[error("attempt timed out")]
    Timeout,

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized `Result` type for this crate's operations.
pub type Result<T> = std::result::Result<T, Error>;
