//! Fokker-Planck surrogate simulator for combination cancer therapy.
//!
//! A learned density network stands in for the Fokker-Planck solution of the
//! tumor-cell concentration distribution under two inhibitors (CSF1R-I and
//! IGF1R-I). Drug levels follow closed-form pharmacokinetics; a treatment
//! environment turns each predicted density into survival, cure and reward
//! signals for a dosing policy.

pub mod config;
pub mod error;
pub mod ml;
pub mod pk;
pub mod record;
pub mod rl;

pub use config::{SimulationConfig, DENSITY_LAYER_WIDTHS};
pub use error::{ModelLoadError, SimError, SimResult};
pub use ml::{BackendKind, DensityNetwork, ModelParameters, SurrogateInput, SurrogateModel, SurrogateOutput};
pub use pk::{DrugChannel, KineticRates};
pub use rl::{JointAction, Observation, SimulationEnvironment, StepOutcome, TreatmentSchedule};
