// Reinforcement learning layer over the surrogate
//
// The treatment environment, reward shaping, fixed schedules and the
// policy/value networks that consume the observation history.

pub mod core;
pub mod env;
pub mod policy;
pub mod reward;
pub mod schedule;

pub use core::{
    ActionIndex, DoseSpace, EnvPhase, Episode, JointAction, Observation, RLEnv, StepInfo,
    StepOutcome,
};
pub use env::{EnvConfig, EnvironmentState, SimulationEnvironment};
pub use policy::{window_observations, ActorCritic, LstmEncoder, MlpHead, PolicyEvaluation};
pub use reward::{normalize_density, shape_reward, DensitySummary};
pub use schedule::{
    rollout, survival_envelope, time_to_event, SchedulePhase, SubjectOutcome, Trajectory,
    TreatmentSchedule,
};
