// Surrogate-backed treatment environment
//
// Each step advances both drugs over one decision interval, asks the
// surrogate for the tumor-cell density at the new time, and turns the
// density into an observation, a shaped reward and a terminal flag.
// One environment owns one episode; the surrogate is shared read-only.

use super::core::{
    ActionIndex, DoseSpace, EnvPhase, JointAction, Observation, RLEnv, StepInfo, StepOutcome,
};
use super::reward::{shape_reward, DensitySummary};
use crate::config::{InitialConditions, RewardConfig, SimulationConfig};
use crate::error::SimResult;
use crate::ml::surrogate::{SurrogateInput, SurrogateModel};
use crate::pk::DrugChannel;
use std::sync::Arc;

/// Environment settings, usually derived from a `SimulationConfig`
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub initial: InitialConditions,
    pub csf1r_space: DoseSpace,
    pub igf1r_space: DoseSpace,

    /// Trailing bins counted as death
    pub survival_tail_bins: usize,

    /// Leading bins counted as cure
    pub cure_bins: usize,

    pub reward: RewardConfig,

    /// Interval, bins and time weight used by `RLEnv::step_action`
    pub decision_interval: f64,
    pub bins: Arc<[f64]>,
    pub reward_time_weight: f64,

    /// Histories are preallocated to this many entries
    pub history_capacity: usize,
}

impl EnvConfig {
    pub fn from_simulation(config: &SimulationConfig) -> Self {
        Self {
            initial: config.initial,
            csf1r_space: DoseSpace::binary(),
            igf1r_space: DoseSpace::binary(),
            survival_tail_bins: config.survival_tail_bins,
            cure_bins: config.cure_bins,
            reward: config.reward,
            decision_interval: config.decision_interval,
            bins: config.concentration_bins().into(),
            reward_time_weight: config.reward_time_weight,
            history_capacity: config.horizon_steps() + 1,
        }
    }
}

/// Mutable per-episode state
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentState {
    /// Elapsed time in days
    pub time: f64,

    /// CSF1R-I concentration, one entry per step plus the initial value
    pub csf1r_history: Vec<f64>,

    /// IGF1R-I concentration, one entry per step plus the initial value
    pub igf1r_history: Vec<f64>,

    /// Tumor-cell expectation, one entry per step plus the initial value
    pub tumor_history: Vec<f64>,

    /// Integral of the administered CSF1R-I dose over time
    pub cumulative_dose_time: f64,

    /// Running sum of CSF1R-I substep concentrations fed to the network
    pub cumulative_exposure: f64,

    pub last_state_survival: f64,

    pub observations: Vec<Observation>,
}

impl EnvironmentState {
    fn initial(initial: &InitialConditions, capacity: usize) -> Self {
        let seeded = |value: f64| {
            let mut history = Vec::with_capacity(capacity.max(1));
            history.push(value);
            history
        };
        Self {
            time: 0.0,
            csf1r_history: seeded(initial.csf1r_concentration),
            igf1r_history: seeded(initial.igf1r_concentration),
            tumor_history: seeded(initial.tumor_expectation),
            cumulative_dose_time: 0.0,
            cumulative_exposure: 0.0,
            last_state_survival: 0.0,
            observations: Vec::with_capacity(capacity),
        }
    }

    fn last(history: &[f64]) -> f64 {
        // histories are seeded on construction and only grow
        history.last().copied().unwrap_or_default()
    }

    pub fn csf1r_concentration(&self) -> f64 {
        Self::last(&self.csf1r_history)
    }

    pub fn igf1r_concentration(&self) -> f64 {
        Self::last(&self.igf1r_history)
    }

    pub fn tumor_expectation(&self) -> f64 {
        Self::last(&self.tumor_history)
    }
}

/// Treatment environment over a shared surrogate
#[derive(Debug, Clone)]
pub struct SimulationEnvironment {
    surrogate: Arc<SurrogateModel>,
    config: EnvConfig,
    state: EnvironmentState,
    phase: EnvPhase,
    steps_taken: usize,
}

impl SimulationEnvironment {
    pub fn new(surrogate: Arc<SurrogateModel>, config: EnvConfig) -> Self {
        let state = EnvironmentState::initial(&config.initial, config.history_capacity);
        Self {
            surrogate,
            config,
            state,
            phase: EnvPhase::Ready,
            steps_taken: 0,
        }
    }

    pub fn from_simulation(surrogate: Arc<SurrogateModel>, config: &SimulationConfig) -> Self {
        Self::new(surrogate, EnvConfig::from_simulation(config))
    }

    /// Reinitialise the episode from the configured initial conditions
    pub fn reset(&mut self) {
        self.state = EnvironmentState::initial(&self.config.initial, self.config.history_capacity);
        self.phase = EnvPhase::Ready;
        self.steps_taken = 0;
    }

    /// Advance one interval under the given dose indices
    ///
    /// `episode_index == 0` forces a zero survival delta, whatever the step
    /// count. Errors leave the state untouched.
    pub fn step(
        &mut self,
        action_c: ActionIndex,
        action_i: ActionIndex,
        episode_index: usize,
        step_interval: f64,
        bins: &[f64],
        reward_time_weight: f64,
    ) -> SimResult<StepOutcome> {
        let dose_c = self.config.csf1r_space.dose(DrugChannel::Csf1rInhibitor, action_c)?;
        let dose_i = self.config.igf1r_space.dose(DrugChannel::Igf1rInhibitor, action_i)?;

        if self.phase == EnvPhase::Terminal {
            log::warn!(
                "stepping a terminated episode at t={:.4}; call reset() to start over",
                self.state.time
            );
        }

        let time = self.state.time + step_interval;
        let cumulative_dose_time = self.state.cumulative_dose_time + dose_c * step_interval;

        let output = self.surrogate.predict(&SurrogateInput {
            bins,
            time,
            dose_csf1r: dose_c,
            cumulative_exposure: self.state.cumulative_exposure,
            dose_igf1r: dose_i,
            csf1r_initial: self.state.csf1r_concentration(),
            igf1r_initial: self.state.igf1r_concentration(),
            tumor_expectation: self.state.tumor_expectation(),
            interval: step_interval,
        })?;
        let summary = DensitySummary::from_density(
            &output.density,
            bins,
            self.config.survival_tail_bins,
            self.config.cure_bins,
        )?;

        let last_state = self.state.observations.clone();

        let state = &mut self.state;
        state.time = time;
        state.cumulative_dose_time = cumulative_dose_time;
        state.cumulative_exposure = output.cumulative_exposure;
        state.csf1r_history.push(output.csf1r_final);
        state.igf1r_history.push(output.igf1r_final);
        state.tumor_history.push(summary.tumor_expectation);

        let state_survival = summary.state_survival(self.config.reward.death_threshold);
        let survival_delta = if episode_index == 0 {
            0.0
        } else {
            state_survival - state.last_state_survival
        };
        state.observations.push(Observation::new(state_survival, survival_delta));
        state.last_state_survival = state_survival;

        let (reward, done) = shape_reward(
            &summary,
            JointAction::new(action_c, action_i),
            self.config.csf1r_space.max_index(),
            time,
            cumulative_dose_time,
            reward_time_weight,
            &self.config.reward,
        );

        self.steps_taken += 1;
        self.phase = if done {
            EnvPhase::Terminal
        } else {
            EnvPhase::Running
        };

        log::debug!(
            "step {} t={:.4} action=({}, {}) survival={:.5} cure={:.5} reward={:.4} done={}",
            self.steps_taken,
            time,
            action_c,
            action_i,
            summary.survival,
            summary.cure,
            reward,
            done
        );

        Ok(StepOutcome {
            last_state,
            reward,
            done,
            now_state: state.observations.clone(),
            info: StepInfo {
                time,
                survival_probability: summary.survival,
                death_probability: summary.death,
                cure_probability: summary.cure,
                tumor_expectation: summary.tumor_expectation,
                csf1r_concentration: output.csf1r_final,
                igf1r_concentration: output.igf1r_final,
                cumulative_dose_time,
            },
        })
    }

    pub fn state(&self) -> &EnvironmentState {
        &self.state
    }

    pub fn phase(&self) -> EnvPhase {
        self.phase
    }

    pub fn observations(&self) -> &[Observation] {
        &self.state.observations
    }

    pub fn time(&self) -> f64 {
        self.state.time
    }

    pub fn steps_taken(&self) -> usize {
        self.steps_taken
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    pub fn surrogate(&self) -> &SurrogateModel {
        &self.surrogate
    }
}

impl RLEnv for SimulationEnvironment {
    fn observation_dim(&self) -> usize {
        2
    }

    fn num_actions(&self) -> usize {
        self.config.csf1r_space.len() * self.config.igf1r_space.len()
    }

    fn reset(&mut self) -> anyhow::Result<Vec<Observation>> {
        SimulationEnvironment::reset(self);
        Ok(self.state.observations.clone())
    }

    fn step_action(&mut self, action: JointAction) -> anyhow::Result<StepOutcome> {
        let bins = Arc::clone(&self.config.bins);
        let outcome = self.step(
            action.csf1r,
            action.igf1r,
            self.steps_taken,
            self.config.decision_interval,
            &bins,
            self.config.reward_time_weight,
        )?;
        Ok(outcome)
    }

    fn name(&self) -> &str {
        "SimulationEnvironment"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KINETIC_PARAM_COUNT;
    use crate::error::SimError;
    use crate::ml::network::{DenseLayer, DensityNetwork};
    use crate::ml::params::ModelParameters;
    use ndarray::{arr1, arr2};

    const DT: f64 = 1.0 / 48.0;

    /// Single affine layer over the five normalised inputs
    fn surrogate(weights: [f64; 5], bias: f64) -> Arc<SurrogateModel> {
        let layer = DenseLayer::new(arr2(&[weights]), arr1(&[bias])).unwrap();
        let network = DensityNetwork::from_layers(vec![layer]).unwrap();
        let params = ModelParameters::from_parts([0.0; KINETIC_PARAM_COUNT], network);
        Arc::new(SurrogateModel::new(Arc::new(params), &SimulationConfig::default()).unwrap())
    }

    /// Mass decreasing in concentration: survival ~0.9994, cure 0.02
    fn healthy_env() -> SimulationEnvironment {
        SimulationEnvironment::from_simulation(
            surrogate([0.0, -1.0, 0.0, 0.0, 0.0], 1.0),
            &SimulationConfig::default(),
        )
    }

    /// Mass drifting with time so consecutive survivals differ
    fn drifting_env() -> SimulationEnvironment {
        SimulationEnvironment::from_simulation(
            surrogate([0.5, -1.0, 0.0, 0.0, 0.0], 1.0),
            &SimulationConfig::default(),
        )
    }

    fn bins() -> Vec<f64> {
        SimulationConfig::default().concentration_bins()
    }

    #[test]
    fn test_reset_yields_empty_observations() {
        let mut env = healthy_env();
        assert!(env.observations().is_empty());
        assert_eq!(env.phase(), EnvPhase::Ready);

        env.step(1, 0, 0, DT, &bins(), 0.0).unwrap();
        env.reset();
        assert!(env.observations().is_empty());
        assert_eq!(env.time(), 0.0);
        assert_eq!(env.state().csf1r_history, vec![0.0]);
        assert_eq!(env.state().tumor_history, vec![0.58]);
        assert_eq!(env.phase(), EnvPhase::Ready);
    }

    #[test]
    fn test_one_step_appends_one_observation() {
        let mut env = healthy_env();
        let outcome = env.step(1, 0, 0, DT, &bins(), 0.0).unwrap();

        assert_eq!(env.observations().len(), 1);
        assert!(outcome.last_state.is_empty());
        assert_eq!(outcome.now_state.len(), 1);
        assert_eq!(env.phase(), EnvPhase::Running);
    }

    #[test]
    fn test_first_episode_step_has_zero_delta() {
        let mut env = drifting_env();
        let b = bins();
        for k in 1..5 {
            env.step(1, 1, k, DT, &b, 0.0).unwrap();
        }
        env.reset();

        let outcome = env.step(1, 0, 0, DT, &b, 0.0).unwrap();
        assert_eq!(outcome.now_state[0].survival_delta, 0.0);
    }

    #[test]
    fn test_episode_index_zero_rule_is_literal() {
        let mut env = drifting_env();
        let b = bins();
        env.step(0, 0, 0, DT, &b, 0.0).unwrap();
        let second = env.step(0, 0, 0, DT, &b, 0.0).unwrap();
        assert_eq!(second.now_state[1].survival_delta, 0.0);

        let third = env.step(0, 0, 1, DT, &b, 0.0).unwrap();
        let expected = third.now_state[2].state_survival - third.now_state[1].state_survival;
        assert_eq!(third.now_state[2].survival_delta, expected);
    }

    #[test]
    fn test_histories_and_time_advance() {
        let mut env = healthy_env();
        let b = bins();
        let mut last_time = env.time();
        for k in 0..6 {
            let outcome = env.step(k % 2, 1, k, DT, &b, 0.0).unwrap();
            assert!(env.time() > last_time);
            assert!((env.time() - last_time - DT).abs() < 1e-12);
            assert_eq!(outcome.last_state.len(), k);
            last_time = env.time();
        }
        let state = env.state();
        assert_eq!(state.csf1r_history.len(), 7);
        assert_eq!(state.igf1r_history.len(), 7);
        assert_eq!(state.tumor_history.len(), 7);
        assert!((state.cumulative_dose_time - 3.0 * DT).abs() < 1e-12);
        assert!(state.igf1r_concentration() > 0.0);
    }

    #[test]
    fn test_comfortable_rewards() {
        let mut env = healthy_env();
        let b = bins();
        let rest = env.step(0, 0, 0, DT, &b, 0.0).unwrap();
        assert!(!rest.done);
        assert!((rest.reward - 0.2).abs() < 1e-12);
        assert!(rest.info.survival_probability > 0.99);

        let dosed = env.step(1, 1, 1, DT, &b, 0.0).unwrap();
        assert!((dosed.reward - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_death_terminates() {
        // Only the top five bins carry mass, three of them in the tail
        let mut env = SimulationEnvironment::from_simulation(
            surrogate([0.0, 1.0, 0.0, 0.0, 0.0], -0.9),
            &SimulationConfig::default(),
        );
        let outcome = env.step(1, 1, 0, DT, &bins(), 0.0).unwrap();
        assert!(outcome.done);
        assert_eq!(outcome.reward, -0.1);
        assert_eq!(env.phase(), EnvPhase::Terminal);

        // stepping on is allowed
        assert!(env.step(1, 1, 1, DT, &bins(), 0.0).is_ok());
    }

    #[test]
    fn test_invalid_action_leaves_state_untouched() {
        let mut env = healthy_env();
        let result = env.step(2, 0, 0, DT, &bins(), 0.0);
        assert!(matches!(result, Err(SimError::InvalidAction { index: 2, .. })));
        assert!(env.observations().is_empty());
        assert_eq!(env.time(), 0.0);
        assert_eq!(env.phase(), EnvPhase::Ready);
    }

    #[test]
    fn test_failed_step_leaves_state_untouched() {
        let mut env = healthy_env();
        // fewer bins than tail bins: everything counts as death
        let short = [0.1, 0.2];
        assert!(env.step(0, 0, 0, DT, &short, 0.0).unwrap().done);

        let result = env.step(0, 0, 1, 0.001, &bins(), 0.0);
        assert!(matches!(result, Err(SimError::InvalidInterval { .. })));
        assert_eq!(env.observations().len(), 1);
    }

    #[test]
    fn test_rl_env_uses_step_count() {
        let mut env = drifting_env();
        let reset = RLEnv::reset(&mut env).unwrap();
        assert!(reset.is_empty());
        assert_eq!(env.num_actions(), 4);
        assert_eq!(env.observation_dim(), 2);

        let first = env.step_action(JointAction::BOTH).unwrap();
        assert_eq!(first.now_state[0].survival_delta, 0.0);
        let second = env.step_action(JointAction::BOTH).unwrap();
        let expected = second.now_state[1].state_survival - second.now_state[0].state_survival;
        assert_eq!(second.now_state[1].survival_delta, expected);
        assert_eq!(env.steps_taken(), 2);
    }
}
