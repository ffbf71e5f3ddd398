// Core RL abstractions
//
// Dose spaces, joint actions, the two-feature observation, step results and
// the RLEnv trait implemented by the surrogate-backed environment.

use crate::error::{SimError, SimResult};
use crate::pk::DrugChannel;
use serde::{Deserialize, Serialize};

/// Discrete index into a dose space
pub type ActionIndex = usize;

/// Fixed discrete set of dose levels for one drug
///
/// Serialises as a plain list of levels; deserialising goes through
/// [`DoseSpace::new`], so an empty list is rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct DoseSpace {
    levels: Vec<f64>,
}

impl TryFrom<Vec<f64>> for DoseSpace {
    type Error = SimError;

    fn try_from(levels: Vec<f64>) -> SimResult<Self> {
        Self::new(levels)
    }
}

impl From<DoseSpace> for Vec<f64> {
    fn from(space: DoseSpace) -> Self {
        space.levels
    }
}

impl DoseSpace {
    pub fn new(levels: Vec<f64>) -> SimResult<Self> {
        if levels.is_empty() {
            return Err(SimError::Config("dose space must not be empty".to_string()));
        }
        Ok(Self { levels })
    }

    /// The on/off space `{0.0, 1.0}`
    pub fn binary() -> Self {
        Self {
            levels: vec![0.0, 1.0],
        }
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Largest valid index, the reference point of the withholding penalty
    pub fn max_index(&self) -> ActionIndex {
        self.levels.len() - 1
    }

    pub fn levels(&self) -> &[f64] {
        &self.levels
    }

    /// Dose selected by `index`, or `InvalidAction` when out of range
    pub fn dose(&self, channel: DrugChannel, index: ActionIndex) -> SimResult<f64> {
        self.levels
            .get(index)
            .copied()
            .ok_or(SimError::InvalidAction {
                channel: channel.label(),
                index,
                len: self.levels.len(),
            })
    }
}

impl Default for DoseSpace {
    fn default() -> Self {
        Self::binary()
    }
}

/// One index per drug
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JointAction {
    pub csf1r: ActionIndex,
    pub igf1r: ActionIndex,
}

impl JointAction {
    pub const REST: JointAction = JointAction { csf1r: 0, igf1r: 0 };
    pub const CSF1R_ONLY: JointAction = JointAction { csf1r: 1, igf1r: 0 };
    pub const IGF1R_ONLY: JointAction = JointAction { csf1r: 0, igf1r: 1 };
    pub const BOTH: JointAction = JointAction { csf1r: 1, igf1r: 1 };

    pub fn new(csf1r: ActionIndex, igf1r: ActionIndex) -> Self {
        Self { csf1r, igf1r }
    }

    /// Decode a flat index over the product space, IGF1R-I varying fastest
    pub fn from_flat(index: usize, igf1r_len: usize) -> Self {
        Self {
            csf1r: index / igf1r_len,
            igf1r: index % igf1r_len,
        }
    }

    pub fn to_flat(&self, igf1r_len: usize) -> usize {
        self.csf1r * igf1r_len + self.igf1r
    }
}

/// Observation entry appended once per step
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Observation {
    /// Survival probability rescaled so the death threshold maps to 0
    pub state_survival: f64,

    /// Change of `state_survival` since the previous step
    pub survival_delta: f64,
}

impl Observation {
    pub fn new(state_survival: f64, survival_delta: f64) -> Self {
        Self {
            state_survival,
            survival_delta,
        }
    }

    pub fn to_array(&self) -> [f64; 2] {
        [self.state_survival, self.survival_delta]
    }
}

/// Quantities derived during a step, for logging and analysis
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StepInfo {
    pub time: f64,
    pub survival_probability: f64,
    pub death_probability: f64,
    pub cure_probability: f64,
    pub tumor_expectation: f64,
    pub csf1r_concentration: f64,
    pub igf1r_concentration: f64,
    pub cumulative_dose_time: f64,
}

/// Result of one environment step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    /// Observation history before the step
    pub last_state: Vec<Observation>,

    pub reward: f64,

    pub done: bool,

    /// Observation history after the step, ending in the new entry
    pub now_state: Vec<Observation>,

    pub info: StepInfo,
}

impl StepOutcome {
    /// The entry appended by this step
    pub fn observation(&self) -> Option<&Observation> {
        self.now_state.last()
    }
}

/// Lifecycle of an environment between resets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvPhase {
    /// Freshly reset, no step taken
    Ready,
    /// At least one step taken, not terminal
    Running,
    /// Death or cure threshold crossed
    Terminal,
}

/// Reinforcement learning environment over joint dose actions
///
/// `step_action` is the driver-facing entry point: it uses the
/// environment's configured interval, bins and reward weight.
pub trait RLEnv {
    /// Width of one observation entry
    fn observation_dim(&self) -> usize;

    /// Size of the joint action space
    fn num_actions(&self) -> usize;

    /// Start a new episode and return the (empty) observation history
    fn reset(&mut self) -> anyhow::Result<Vec<Observation>>;

    /// Advance one decision interval
    fn step_action(&mut self, action: JointAction) -> anyhow::Result<StepOutcome>;

    fn name(&self) -> &str {
        "RLEnv"
    }
}

/// Episode trajectory for logging and analysis
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Episode {
    pub observations: Vec<Observation>,
    pub actions: Vec<JointAction>,
    pub rewards: Vec<f64>,
    pub infos: Vec<StepInfo>,
    pub total_return: f64,
    pub length: usize,
    pub terminated: bool,
}

impl Episode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_step(&mut self, action: JointAction, outcome: &StepOutcome) {
        if let Some(obs) = outcome.observation() {
            self.observations.push(*obs);
        }
        self.actions.push(action);
        self.rewards.push(outcome.reward);
        self.infos.push(outcome.info);
        self.total_return += outcome.reward;
        self.length += 1;
        self.terminated |= outcome.done;
    }

    pub fn avg_reward(&self) -> f64 {
        if self.length == 0 {
            0.0
        } else {
            self.total_return / self.length as f64
        }
    }
}
