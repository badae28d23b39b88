//! Raid outcome strategies.
//!
//! The processor asks a [`RaidResolver`] whether a raid lands; it never rolls
//! dice itself. The baseline is a uniform coin with a configurable success
//! chance. A skill-based mini-game can replace it as long as it answers the
//! same yes/no question. Tests use [`FixedRaid`].

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::model::{Edge, PlayerId};

/// Decides whether `raider`'s attempt on `edge` succeeds.
pub trait RaidResolver: Send + Sync {
    fn resolve(&self, raider: PlayerId, edge: &Edge) -> bool;
}

/// Always succeeds or always fails.
#[derive(Debug, Clone, Copy)]
pub struct FixedRaid(pub bool);

impl RaidResolver for FixedRaid {
    fn resolve(&self, _raider: PlayerId, _edge: &Edge) -> bool {
        self.0
    }
}

/// Independent Bernoulli trial per raid.
#[derive(Debug)]
pub struct UniformRaid {
    chance: f64,
    rng: Mutex<StdRng>,
}

impl UniformRaid {
    /// Deterministic sequence from `seed`. `chance` is clamped into `[0, 1]`.
    pub fn seeded(chance: f64, seed: u64) -> Self {
        Self {
            chance: sanitize(chance),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Seeded from OS entropy.
    #[cfg(feature = "os-rng")]
    pub fn from_entropy(chance: f64) -> Self {
        Self {
            chance: sanitize(chance),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn chance(&self) -> f64 {
        self.chance
    }
}

fn sanitize(chance: f64) -> f64 {
    if chance.is_nan() {
        0.0
    } else {
        chance.clamp(0.0, 1.0)
    }
}

impl RaidResolver for UniformRaid {
    fn resolve(&self, _raider: PlayerId, _edge: &Edge) -> bool {
        let mut rng = match self.rng.lock() {
            Ok(rng) => rng,
            Err(poisoned) => poisoned.into_inner(),
        };
        rng.gen_bool(self.chance)
    }
}
