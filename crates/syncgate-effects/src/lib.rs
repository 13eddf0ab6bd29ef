//! Syncgate Effects: production handlers for the gateway's effect traits
//!
//! - [`storage::FilesystemStorageHandler`]: crash-safe durable storage
//! - [`storage::MemoryStorageHandler`]: process-local storage
//! - [`time::RealTimeHandler`]: system clock and tokio timers
//! - [`random::RealRandomHandler`]: thread-local CSPRNG
//! - [`transport::HttpTransportHandler`]: the remote API over HTTP
//!
//! Deterministic counterparts for tests live in `syncgate-testkit`.

#![forbid(unsafe_code)]

pub mod random;
pub mod storage;
pub mod time;
pub mod transport;

pub use random::RealRandomHandler;
pub use storage::{FilesystemStorageConfig, FilesystemStorageHandler, MemoryStorageHandler};
pub use time::RealTimeHandler;
pub use transport::HttpTransportHandler;
