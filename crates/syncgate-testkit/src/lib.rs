//! Syncgate Testing Infrastructure
//!
//! Deterministic stand-ins for every effect seam, so gateway behavior can be
//! driven step by step:
//!
//! ```rust,no_run
//! use syncgate_testkit::TestEffects;
//!
//! let effects = TestEffects::new(42, 1_700_000_000_000);
//! effects.transport.set_online(false);
//! effects.time.advance_ms(60_000);
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

pub mod fixtures;
pub mod random;
pub mod storage;
pub mod time;
pub mod transport;

pub use fixtures::TestEffects;
pub use random::SeededRandomHandler;
pub use storage::FaultyStorageHandler;
pub use time::SimulatedTimeHandler;
pub use transport::ScriptedTransport;
