// Density summaries and reward shaping
//
// Survival, death and cure are mass fractions of the unnormalised density
// over fixed bin ranges. Every division by the total mass carries
// DENSITY_EPSILON, so an all-zero density yields zero probabilities instead
// of an error.

use super::core::{ActionIndex, JointAction};
use crate::config::{RewardConfig, DENSITY_EPSILON};
use crate::error::{SimError, SimResult};
use serde::{Deserialize, Serialize};

/// Divide a density by its mass
pub fn normalize_density(density: &[f64]) -> Vec<f64> {
    let total: f64 = density.iter().sum();
    density.iter().map(|p| p / (total + DENSITY_EPSILON)).collect()
}

/// Probabilities derived from one predicted density
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DensitySummary {
    pub total_mass: f64,
    pub survival: f64,
    pub death: f64,
    pub cure: f64,
    pub tumor_expectation: f64,
}

impl DensitySummary {
    /// Summarise `density` over `bins`
    ///
    /// The last `tail_bins` bins count as death and the first `cure_bins`
    /// bins as cure.
    pub fn from_density(
        density: &[f64],
        bins: &[f64],
        tail_bins: usize,
        cure_bins: usize,
    ) -> SimResult<Self> {
        if density.len() != bins.len() {
            return Err(SimError::DimensionMismatch {
                what: "density vector",
                expected: bins.len(),
                found: density.len(),
            });
        }
        let n = density.len();
        let total: f64 = density.iter().sum();
        let denom = total + DENSITY_EPSILON;

        let alive: f64 = density[..n.saturating_sub(tail_bins)].iter().sum();
        let cured: f64 = density[..cure_bins.min(n)].iter().sum();
        let survival = alive / denom;

        let tumor_expectation = density
            .iter()
            .zip(bins)
            .map(|(p, c)| p / denom * c)
            .sum();

        Ok(Self {
            total_mass: total,
            survival,
            death: 1.0 - survival,
            cure: cured / denom,
            tumor_expectation,
        })
    }

    /// Survival rescaled so that `1 - death_threshold` maps to 0 and 1 maps to 1
    pub fn state_survival(&self, death_threshold: f64) -> f64 {
        (self.survival - (1.0 - death_threshold)) / death_threshold
    }
}

/// Shaped reward and terminal flag for one step
///
/// Death is checked before cure; both thresholds are inclusive. The
/// withholding penalties, rest bonuses and the drug-holiday time bonus apply
/// only to non-terminal steps.
pub fn shape_reward(
    summary: &DensitySummary,
    action: JointAction,
    max_index: ActionIndex,
    elapsed_time: f64,
    dose_time: f64,
    time_weight: f64,
    cfg: &RewardConfig,
) -> (f64, bool) {
    if summary.death >= cfg.death_threshold {
        return (cfg.death_reward, true);
    }
    if summary.cure >= cfg.cure_threshold {
        return (cfg.base_reward + cfg.cure_bonus, true);
    }

    let max_index = max_index as f64;
    let mut reward = cfg.base_reward;

    if summary.death >= cfg.dose_punish_threshold() {
        reward -= cfg.dose_penalty * (max_index - action.csf1r as f64);
    } else if action.csf1r == 0 {
        reward += cfg.rest_bonus;
    }

    if summary.survival <= cfg.survival_comfort {
        reward -= cfg.dose_penalty * (max_index - action.igf1r as f64);
    } else if action.igf1r == 0 {
        reward += cfg.rest_bonus;
    }

    if summary.survival > cfg.survival_comfort {
        reward += time_weight * (elapsed_time - dose_time);
    }

    (reward, false)
}
