//! Error taxonomy for the gateway
//!
//! One enum per concern. Callers of the gateway only ever see [`GatewayError`];
//! storage and transport failures are folded into it with `#[from]` so the
//! internals can propagate with `?`.

use serde::{Deserialize, Serialize};

use crate::http::GatewayResponse;
use crate::operation::OperationId;

/// Caller-facing error returned by `RequestGateway::execute` and the
/// inspection API.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    /// Malformed input. Never retried.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// What was wrong with the request
        message: String,
    },

    /// The endpoint's rate-limit window is exhausted. Surfaced immediately,
    /// never queued.
    #[error("Rate limited on '{endpoint}', retry after {retry_after_seconds}s")]
    RateLimited {
        /// Endpoint key whose window is exhausted
        endpoint: String,
        /// Seconds until the window rolls over
        retry_after_seconds: u64,
    },

    /// Transport-level failure. Mutating calls never surface this; they are
    /// queued instead.
    #[error("Network failure: {0}")]
    NetworkFailure(#[from] TransportError),

    /// The server answered with an error status. Propagated unchanged and not
    /// retried, the server already processed the request.
    #[error("Remote error: HTTP {status}")]
    Remote {
        /// HTTP status returned by the server
        status: u16,
        /// Full response as received
        response: Box<GatewayResponse>,
    },

    /// A queued operation outlived the retention horizon.
    #[error("Operation {operation_id} permanently failed: retention horizon exceeded")]
    PermanentDeliveryFailure {
        /// The expired operation
        operation_id: OperationId,
    },

    /// Lookup by id found nothing.
    #[error("Not found: {what}")]
    NotFound {
        /// Description of the missing record
        what: String,
    },

    /// The requested transition is not legal from the record's current state.
    #[error("Invalid state: {message}")]
    InvalidState {
        /// Why the transition was refused
        message: String,
    },

    /// Durable storage failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration rejected at load or validation time.
    #[error("Configuration error: {message}")]
    Config {
        /// What was wrong with the configuration
        message: String,
    },
}

impl GatewayError {
    /// Create an invalid request error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Retry hint carried by a rate-limit denial
    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            Self::RateLimited {
                retry_after_seconds,
                ..
            } => Some(*retry_after_seconds),
            _ => None,
        }
    }

    /// Whether the failure is a transport-level (offline) condition
    pub fn is_network_failure(&self) -> bool {
        matches!(self, Self::NetworkFailure(_))
    }
}

/// Standard result type for gateway operations
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Transport-level failures. All of them are transient: the request may not
/// have reached the server and is safe to queue or serve from cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum TransportError {
    /// No response within the bounded timeout
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout {
        /// Timeout that elapsed
        timeout_ms: u64,
    },

    /// Host name resolution failed
    #[error("DNS resolution failed: {message}")]
    Dns {
        /// Resolver message
        message: String,
    },

    /// Connection dropped mid-exchange
    #[error("Connection reset: {message}")]
    ConnectionReset {
        /// Underlying message
        message: String,
    },

    /// Connection could not be established
    #[error("Connection failed: {message}")]
    ConnectionFailed {
        /// Underlying message
        message: String,
    },

    /// The host reported itself offline; no attempt was made
    #[error("Host is offline")]
    Offline,

    /// The exchange completed at the socket level but was unreadable
    #[error("Protocol error: {message}")]
    Protocol {
        /// Underlying message
        message: String,
    },
}

/// Durable storage failures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum StorageError {
    /// Key rejected by the backend
    #[error("Invalid key: {reason}")]
    InvalidKey {
        /// Why the key was rejected
        reason: String,
    },

    /// Write did not complete
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// Read did not complete
    #[error("Read failed: {0}")]
    ReadFailed(String),

    /// Delete did not complete
    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    /// Enumeration did not complete
    #[error("List failed: {0}")]
    ListFailed(String),

    /// Stored bytes could not be decoded
    #[error("Corruption detected: {details}")]
    CorruptionDetected {
        /// What could not be decoded
        details: String,
    },

    /// Stored bytes do not match their recorded checksum
    #[error("Integrity check failed for '{key}': expected {expected}, got {actual}")]
    IntegrityCheckFailed {
        /// Affected key
        key: String,
        /// Checksum recorded at write time
        expected: String,
        /// Checksum of the bytes read back
        actual: String,
    },

    /// Record (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Backend could not be set up
    #[error("Configuration error: {reason}")]
    ConfigurationError {
        /// Why setup failed
        reason: String,
    },
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::ReadFailed(err.to_string()),
            _ => Self::WriteFailed(err.to_string()),
        }
    }
}
