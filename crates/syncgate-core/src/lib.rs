//! Syncgate Core: shared vocabulary of the offline request gateway
//!
//! This crate holds everything the gateway components agree on and nothing
//! that performs I/O:
//!
//! - **Requests and responses** ([`http`]): HTTP-style descriptors with JSON bodies
//! - **Persisted entities** ([`operation`], [`rate_limit`], [`conflict`]):
//!   queued operations, rate-limit windows and conflict records
//! - **Error taxonomy** ([`errors`]): the caller-facing [`GatewayError`] and the
//!   storage/transport errors it wraps
//! - **Configuration** ([`config`]): the immutable [`GatewayConfig`] injected at
//!   construction
//! - **Effect traits** ([`effects`]): clock, randomness, storage and transport
//!   seams, implemented by `syncgate-effects` and `syncgate-testkit`

#![forbid(unsafe_code)]

pub mod config;
pub mod conflict;
pub mod effects;
pub mod errors;
pub mod http;
pub mod operation;
pub mod rate_limit;

pub use config::{CacheStrategy, GatewayConfig};
pub use conflict::{ConflictId, ConflictRecord, ConflictStatus};
pub use errors::{GatewayError, GatewayResult, StorageError, TransportError};
pub use http::{Body, GatewayRequest, GatewayResponse, Headers, Method, ResponseSource};
pub use operation::{OperationId, OperationIdGenerator, OperationStatus, Priority, QueuedOperation};
pub use rate_limit::{RateLimitRule, RateLimitWindow};
