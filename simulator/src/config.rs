// Simulation configuration
//
// All constants of the reference experiment live here so a scenario can be
// reproduced from one JSON file. Every field has a default; partial files
// override only what they name.

use crate::error::{SimError, SimResult};
use crate::ml::backend::BackendKind;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Width of the reference density network, input to output
pub const DENSITY_LAYER_WIDTHS: [usize; 11] = [5, 40, 120, 250, 500, 1000, 1000, 600, 300, 150, 1];

/// Number of trained kinetic log-parameters in the parameter store
pub const KINETIC_PARAM_COUNT: usize = 16;

/// Additive guard used whenever a density is divided by its own mass
pub const DENSITY_EPSILON: f64 = 1e-7;

/// Normalisation bounds for the concentration and time inputs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bounds {
    /// (lower, upper) tumor-cell concentration
    pub concentration: (f64, f64),

    /// (lower, upper) time in days
    pub time: (f64, f64),
}

impl Bounds {
    /// Bounds the reference network was trained with
    pub fn reference(bin_width: f64, decision_interval: f64) -> Self {
        Self {
            concentration: (bin_width, 1.0),
            time: (decision_interval, 200.0),
        }
    }
}

impl Default for Bounds {
    fn default() -> Self {
        Self::reference(0.01, 1.0 / 48.0)
    }
}

/// Production and clearance constants for one drug
///
/// The trained log-parameters scale these: `a = e^p_q * q` and
/// `b = e^p_eta * eta + e^p_mu * mu` (times the tumor expectation for the
/// IGF1R inhibitor).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrugConstants {
    pub q: f64,
    pub eta: f64,
    pub mu: f64,
}

impl Default for DrugConstants {
    fn default() -> Self {
        Self {
            q: 0.8,
            eta: 2e-3,
            mu: 2e-3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KineticConstants {
    pub csf1r: DrugConstants,
    pub igf1r: DrugConstants,
}

/// State every episode starts from
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitialConditions {
    pub csf1r_concentration: f64,
    pub igf1r_concentration: f64,
    pub tumor_expectation: f64,
}

impl Default for InitialConditions {
    fn default() -> Self {
        Self {
            csf1r_concentration: 0.0,
            igf1r_concentration: 0.0,
            tumor_expectation: 0.58,
        }
    }
}

/// Reward shaping constants
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    /// Death probability at or above which the episode ends
    pub death_threshold: f64,

    /// Cure probability at or above which the episode ends
    pub cure_threshold: f64,

    /// Fraction of the death threshold above which withholding CSF1R-I is punished
    pub dose_punish_fraction: f64,

    /// Survival probability at or below which withholding IGF1R-I is punished
    pub survival_comfort: f64,

    /// Reward every non-death step starts from
    pub base_reward: f64,

    /// Reward when the death branch fires
    pub death_reward: f64,

    /// Bonus added to `base_reward` when the cure branch fires
    pub cure_bonus: f64,

    /// Bonus for withholding a drug when it is not needed
    pub rest_bonus: f64,

    /// Scale of the withholding penalty per action index
    pub dose_penalty: f64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            death_threshold: 0.2,
            cure_threshold: 0.99,
            dose_punish_fraction: 0.5,
            survival_comfort: 0.9,
            base_reward: 0.1,
            death_reward: -0.1,
            cure_bonus: 1.0,
            rest_bonus: 0.05,
            dose_penalty: 0.1,
        }
    }
}

impl RewardConfig {
    /// Death probability above which the CSF1R-I withholding penalty applies
    pub fn dose_punish_threshold(&self) -> f64 {
        self.death_threshold * self.dose_punish_fraction
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Pharmacokinetic substep in days
    pub substep: f64,

    /// RL decision interval in days
    pub decision_interval: f64,

    /// Width of one tumor-cell concentration bin
    pub bin_width: f64,

    /// Upper edge of the bin range; bins run from `bin_width` to here
    pub bin_max: f64,

    /// Simulated horizon in days
    pub horizon_days: f64,

    pub bounds: Bounds,

    pub initial: InitialConditions,

    pub kinetics: KineticConstants,

    pub reward: RewardConfig,

    /// Trailing bins counted as death when computing survival
    pub survival_tail_bins: usize,

    /// Leading bins counted as cure
    pub cure_bins: usize,

    /// Reward weight of the drug-holiday time bonus
    pub reward_time_weight: f64,

    /// Density network widths, input to output
    pub layer_widths: Vec<usize>,

    /// Backend name resolved once by `BackendKind::from_variant_name`
    pub backend: String,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        let substep = 1.0 / 48.0;
        let bin_width = 0.01;
        Self {
            substep,
            decision_interval: substep,
            bin_width,
            bin_max: 1.0,
            horizon_days: 200.0,
            bounds: Bounds::reference(bin_width, substep),
            initial: InitialConditions::default(),
            kinetics: KineticConstants::default(),
            reward: RewardConfig::default(),
            survival_tail_bins: 3,
            cure_bins: 1,
            reward_time_weight: 0.0,
            layer_widths: DENSITY_LAYER_WIDTHS.to_vec(),
            backend: "cpu".to_string(),
        }
    }
}

impl SimulationConfig {
    /// Load a configuration from a JSON file and validate it
    pub fn load<P: AsRef<Path>>(path: P) -> SimResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .map_err(|e| SimError::Config(format!("cannot read '{}': {}", path.display(), e)))?;
        let cfg: SimulationConfig = serde_json::from_slice(&bytes)
            .map_err(|e| SimError::Config(format!("cannot parse '{}': {}", path.display(), e)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate the configuration
    pub fn validate(&self) -> SimResult<()> {
        if !(self.substep > 0.0 && self.substep.is_finite()) {
            return Err(SimError::Config("substep must be positive".to_string()));
        }
        if self.decision_interval < self.substep {
            return Err(SimError::Config(
                "decision_interval must hold at least one substep".to_string(),
            ));
        }
        let ratio = self.decision_interval / self.substep;
        if (ratio - ratio.round()).abs() > crate::pk::MULTIPLE_TOLERANCE {
            log::warn!(
                "decision interval {} is not a multiple of substep {}; {} substeps will be used",
                self.decision_interval,
                self.substep,
                ratio.trunc()
            );
        }
        if !(self.bin_width > 0.0) || self.bin_max < self.bin_width {
            return Err(SimError::Config("bin range is empty".to_string()));
        }
        let (c_lo, c_hi) = self.bounds.concentration;
        let (t_lo, t_hi) = self.bounds.time;
        if c_lo >= c_hi || t_lo >= t_hi {
            return Err(SimError::Config(
                "bounds must satisfy lower < upper".to_string(),
            ));
        }
        if self.layer_widths.first() != Some(&5) || self.layer_widths.last() != Some(&1) {
            return Err(SimError::Config(
                "layer widths must start at 5 inputs and end at 1 output".to_string(),
            ));
        }
        for (name, value) in [
            ("death_threshold", self.reward.death_threshold),
            ("cure_threshold", self.reward.cure_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(SimError::Config(format!("{} must be in (0, 1]", name)));
            }
        }
        if self.cure_bins == 0 {
            return Err(SimError::Config("cure_bins must be > 0".to_string()));
        }
        BackendKind::from_variant_name(&self.backend)?;
        Ok(())
    }

    /// Tumor-cell concentration bin centres `bin_width, 2 bin_width, ..., bin_max`
    pub fn concentration_bins(&self) -> Vec<f64> {
        let n = ((self.bin_max - self.bin_width) / self.bin_width + 0.5).floor() as usize + 1;
        (0..n)
            .map(|i| self.bin_width + i as f64 * self.bin_width)
            .collect()
    }

    /// Maximum cumulative CSF1R-I exposure used to normalise the network input
    pub fn cumulative_max(&self) -> f64 {
        200.0 / self.substep
    }

    /// Number of decision steps covering the horizon
    pub fn horizon_steps(&self) -> usize {
        (self.horizon_days / self.decision_interval).round() as usize
    }

    pub fn backend_kind(&self) -> SimResult<BackendKind> {
        Ok(BackendKind::from_variant_name(&self.backend)?)
    }
}
