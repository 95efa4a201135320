// crates/framecut-engine/src/config.rs
//
// Engine configuration. Hosts probe their device once and hand the tier in;
// everything tier-dependent (sprite geometry, cache budget) derives from it.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceTier {
    Low,
    #[default]
    Mid,
    High,
}

impl DeviceTier {
    /// Thumbnail tile dimensions for the sprite pipeline.
    pub fn sprite_tile(self) -> (u32, u32) {
        match self {
            DeviceTier::Low => (128, 72),
            DeviceTier::Mid | DeviceTier::High => (160, 90),
        }
    }

    /// Sprite cache budget in bytes.
    pub fn sprite_budget_bytes(self) -> usize {
        match self {
            DeviceTier::Low  => 10 * 1024 * 1024,
            DeviceTier::Mid  => 25 * 1024 * 1024,
            DeviceTier::High => 50 * 1024 * 1024,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub tier: DeviceTier,
}
