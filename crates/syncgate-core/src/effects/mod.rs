//! Effect traits
//!
//! Everything the gateway needs from the outside world (clock, randomness,
//! durable bytes, the remote API) crosses one of these seams. Production
//! handlers live in `syncgate-effects`; deterministic ones in
//! `syncgate-testkit`.

pub mod random;
pub mod storage;
pub mod time;
pub mod transport;

pub use random::RandomEffects;
pub use storage::{StorageEffects, StorageStats};
pub use time::{PhysicalTime, PhysicalTimeEffects, TimeError};
pub use transport::TransportEffects;
