use bridge_traits::error::BridgeError;
use core_catalog::CatalogError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Failure of a sync operation as a whole.
///
/// Remote rejections never surface here; they are reported per item in
/// [`SyncResult`](crate::processor::SyncResult).
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Storage error: {0}")]
    Storage(#[from] CatalogError),
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Closed set of remote failure kinds, classified at the remote boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RemoteErrorKind {
    /// Connection could not be established or was dropped
    Network,
    /// The request did not complete in time
    Timeout,
    /// HTTP 429
    RateLimited,
    /// HTTP 5xx
    Server(u16),
    /// HTTP 401 / 403
    Unauthorized(u16),
    /// Any other HTTP 4xx
    Client(u16),
    /// No remote store is configured
    NotConfigured,
    /// Anything that fits none of the above
    Unknown,
}

impl RemoteErrorKind {
    /// Maps an unsuccessful HTTP status to a kind.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => RemoteErrorKind::Unauthorized(status),
            429 => RemoteErrorKind::RateLimited,
            400..=499 => RemoteErrorKind::Client(status),
            500..=599 => RemoteErrorKind::Server(status),
            _ => RemoteErrorKind::Unknown,
        }
    }

    /// Whether another attempt could succeed.
    ///
    /// Unknown failures count as retryable; the retry budget still bounds them.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RemoteErrorKind::Network
                | RemoteErrorKind::Timeout
                | RemoteErrorKind::RateLimited
                | RemoteErrorKind::Server(_)
                | RemoteErrorKind::Unknown
        )
    }
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteErrorKind::Network => write!(f, "network"),
            RemoteErrorKind::Timeout => write!(f, "timeout"),
            RemoteErrorKind::RateLimited => write!(f, "rate limited"),
            RemoteErrorKind::Server(status) => write!(f, "server error {}", status),
            RemoteErrorKind::Unauthorized(status) => write!(f, "unauthorized {}", status),
            RemoteErrorKind::Client(status) => write!(f, "client error {}", status),
            RemoteErrorKind::NotConfigured => write!(f, "not configured"),
            RemoteErrorKind::Unknown => write!(f, "unknown"),
        }
    }
}

/// A failed remote call
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("{kind}: {message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::from_status(status), message)
    }

    pub fn not_configured() -> Self {
        Self::new(RemoteErrorKind::NotConfigured, "no remote store configured")
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl From<BridgeError> for RemoteError {
    fn from(err: BridgeError) -> Self {
        let kind = match &err {
            BridgeError::Network(_) => RemoteErrorKind::Network,
            BridgeError::Timeout(_) => RemoteErrorKind::Timeout,
            _ => RemoteErrorKind::Unknown,
        };
        Self::new(kind, err.to_string())
    }
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;
