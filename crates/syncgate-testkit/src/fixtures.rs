//! Bundled deterministic handlers

use std::sync::Arc;

use syncgate_core::effects::{PhysicalTimeEffects, RandomEffects, StorageEffects, TransportEffects};

use crate::{FaultyStorageHandler, ScriptedTransport, SeededRandomHandler, SimulatedTimeHandler};

/// One of each deterministic handler, sharing state across clones
#[derive(Debug, Clone)]
pub struct TestEffects {
    /// Controllable clock
    pub time: SimulatedTimeHandler,
    /// Seeded randomness
    pub random: SeededRandomHandler,
    /// Memory storage with failure injection
    pub storage: FaultyStorageHandler,
    /// Scripted remote API
    pub transport: ScriptedTransport,
}

impl TestEffects {
    /// Fresh handlers seeded with `seed`, clock at `start_ms`
    pub fn new(seed: u64, start_ms: u64) -> Self {
        Self {
            time: SimulatedTimeHandler::new(start_ms),
            random: SeededRandomHandler::new(seed),
            storage: FaultyStorageHandler::default(),
            transport: ScriptedTransport::new(),
        }
    }

    /// Clock as a trait object
    pub fn time_handler(&self) -> Arc<dyn PhysicalTimeEffects> {
        Arc::new(self.time.clone())
    }

    /// Randomness as a trait object
    pub fn random_handler(&self) -> Arc<dyn RandomEffects> {
        Arc::new(self.random.clone())
    }

    /// Storage as a trait object
    pub fn storage_handler(&self) -> Arc<dyn StorageEffects> {
        Arc::new(self.storage.clone())
    }

    /// Transport as a trait object
    pub fn transport_handler(&self) -> Arc<dyn TransportEffects> {
        Arc::new(self.transport.clone())
    }
}
