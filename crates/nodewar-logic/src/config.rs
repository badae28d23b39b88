//! Tunable game rules: costs, raid odds, income rate and reconcile period.
//!
//! Defaults reproduce the live game: capture 10, fortify `(lvl + 1) * 20`,
//! 50% raids, +1 charge per owned node per minute, settlement every 5 minutes.
//!
//! ```
//! use nodewar_logic::config::{validate_config, GameConfig};
//!
//! let config = GameConfig::from_json(r#"{ "raid_success_chance": 0.25 }"#).unwrap();
//! assert_eq!(config.capture_cost, 10);
//! assert!(validate_config(&config).is_empty());
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Charge spent to capture a neutral node.
    pub capture_cost: u64,
    /// Fortifying from level `L` costs `(L + 1) * fortify_cost_step`.
    pub fortify_cost_step: u64,
    /// Probability in `[0, 1]` that a raid destroys the edge.
    pub raid_success_chance: f64,
    /// Income per owned node per whole elapsed minute.
    pub income_per_node_minute: u64,
    /// Seconds between scheduled reconciliation passes.
    pub reconcile_period_secs: u64,
    /// Charge granted to a newly joined player.
    pub starting_charge: u64,
    /// Upper bound on compare-and-set retry loops before reporting `Conflict`.
    pub max_cas_attempts: u32,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            capture_cost: 10,
            fortify_cost_step: 20,
            raid_success_chance: 0.5,
            income_per_node_minute: 1,
            reconcile_period_secs: 300,
            starting_charge: 100,
            max_cas_attempts: 16,
        }
    }
}

impl GameConfig {
    /// Parse from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Cost to raise a node from `level` to `level + 1`, or `None` if it
    /// does not fit in a `u64`.
    pub fn fortify_cost(&self, level: u32) -> Option<u64> {
        (u64::from(level) + 1).checked_mul(self.fortify_cost_step)
    }

    pub fn reconcile_period(&self) -> Duration {
        Duration::from_secs(self.reconcile_period_secs)
    }
}

/// Configuration validation error.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Capturing would be free.
    ZeroCaptureCost,
    /// Fortifying would be free.
    ZeroFortifyStep,
    /// Raid chance outside `[0, 1]` or NaN.
    InvalidRaidChance(f64),
    /// Scheduler would spin.
    ZeroReconcilePeriod,
    /// Conditional writes would never be attempted.
    ZeroCasAttempts,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroCaptureCost => write!(f, "capture_cost must be positive"),
            ConfigError::ZeroFortifyStep => write!(f, "fortify_cost_step must be positive"),
            ConfigError::InvalidRaidChance(p) => {
                write!(f, "raid_success_chance {} is outside [0, 1]", p)
            }
            ConfigError::ZeroReconcilePeriod => {
                write!(f, "reconcile_period_secs must be positive")
            }
            ConfigError::ZeroCasAttempts => write!(f, "max_cas_attempts must be positive"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Validate a game configuration, returning all errors found.
pub fn validate_config(config: &GameConfig) -> Vec<ConfigError> {
    let mut errors = Vec::new();

    if config.capture_cost == 0 {
        errors.push(ConfigError::ZeroCaptureCost);
    }
    if config.fortify_cost_step == 0 {
        errors.push(ConfigError::ZeroFortifyStep);
    }
    if !(0.0..=1.0).contains(&config.raid_success_chance) {
        errors.push(ConfigError::InvalidRaidChance(config.raid_success_chance));
    }
    if config.reconcile_period_secs == 0 {
        errors.push(ConfigError::ZeroReconcilePeriod);
    }
    if config.max_cas_attempts == 0 {
        errors.push(ConfigError::ZeroCasAttempts);
    }

    errors
}
