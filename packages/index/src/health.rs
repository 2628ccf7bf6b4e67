//! Lock-free holder for the engine's probe result.

use std::sync::atomic::{AtomicU8, Ordering};

use crime_radius_incident_models::EngineHealth;

/// Atomically readable [`EngineHealth`].
#[derive(Debug, Default)]
pub struct HealthCell(AtomicU8);

impl HealthCell {
    /// Current health.
    #[must_use]
    pub fn get(&self) -> EngineHealth {
        decode(self.0.load(Ordering::Acquire))
    }

    /// Stores `health`, returning the previous value.
    pub fn set(&self, health: EngineHealth) -> EngineHealth {
        decode(self.0.swap(encode(health), Ordering::AcqRel))
    }
}

const fn encode(health: EngineHealth) -> u8 {
    match health {
        EngineHealth::Unknown => 0,
        EngineHealth::Available => 1,
        EngineHealth::Unavailable => 2,
    }
}

const fn decode(value: u8) -> EngineHealth {
    match value {
        1 => EngineHealth::Available,
        2 => EngineHealth::Unavailable,
        _ => EngineHealth::Unknown,
    }
}
