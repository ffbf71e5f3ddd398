// Fixed treatment schedules and open-loop rollouts
//
// A schedule is a list of phases, each holding one joint action for a number
// of days. Rolling it out queries the surrogate once per decision interval
// without any reward bookkeeping, producing the density surface and drug
// curves used to compare regimens.

use super::core::{DoseSpace, JointAction};
use super::reward::normalize_density;
use crate::config::SimulationConfig;
use crate::error::{SimError, SimResult};
use crate::ml::surrogate::{SurrogateInput, SurrogateModel};
use crate::pk::DrugChannel;
use serde::{Deserialize, Serialize};

/// One constant-action stretch of a schedule
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SchedulePhase {
    pub days: f64,
    pub action: JointAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreatmentSchedule {
    pub name: String,
    pub phases: Vec<SchedulePhase>,
}

impl TreatmentSchedule {
    pub fn new(name: impl Into<String>, phases: Vec<SchedulePhase>) -> Self {
        Self {
            name: name.into(),
            phases,
        }
    }

    /// Four weeks of CSF1R-I, then IGF1R-I alone
    pub fn switch() -> Self {
        Self::new(
            "switch",
            vec![
                SchedulePhase {
                    days: 28.0,
                    action: JointAction::CSF1R_ONLY,
                },
                SchedulePhase {
                    days: 172.0,
                    action: JointAction::IGF1R_ONLY,
                },
            ],
        )
    }

    /// Four weeks of CSF1R-I, then both drugs
    pub fn add() -> Self {
        Self::new(
            "add",
            vec![
                SchedulePhase {
                    days: 28.0,
                    action: JointAction::CSF1R_ONLY,
                },
                SchedulePhase {
                    days: 172.0,
                    action: JointAction::BOTH,
                },
            ],
        )
    }

    /// Regimen found by the trained policy: both drugs for 16 weeks, then IGF1R-I
    pub fn rl_optimized() -> Self {
        Self::new(
            "rl_optimized",
            vec![
                SchedulePhase {
                    days: 28.0,
                    action: JointAction::CSF1R_ONLY,
                },
                SchedulePhase {
                    days: 112.0,
                    action: JointAction::BOTH,
                },
                SchedulePhase {
                    days: 56.0,
                    action: JointAction::IGF1R_ONLY,
                },
            ],
        )
    }

    /// Look up a preset by name; `-` and `_` are interchangeable
    pub fn preset(name: &str) -> SimResult<Self> {
        match name.replace('-', "_").as_str() {
            "switch" => Ok(Self::switch()),
            "add" => Ok(Self::add()),
            "rl_optimized" => Ok(Self::rl_optimized()),
            other => Err(SimError::Config(format!(
                "unknown schedule '{}' (expected switch, add or rl-optimized)",
                other
            ))),
        }
    }

    pub fn total_days(&self) -> f64 {
        self.phases.iter().map(|p| p.days).sum()
    }

    /// One action per decision interval, `round(days / interval)` per phase
    pub fn expand(&self, interval: f64) -> Vec<JointAction> {
        let mut actions = Vec::new();
        for phase in &self.phases {
            let steps = (phase.days / interval).round() as usize;
            actions.extend(std::iter::repeat(phase.action).take(steps));
        }
        actions
    }
}

/// Open-loop prediction along a schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub schedule: String,
    pub interval: f64,
    pub bin_width: f64,
    pub bins: Vec<f64>,

    /// Prediction times `(k + 1) * interval`
    pub times: Vec<f64>,

    /// Normalised density per step, scaled to a probability density
    pub densities: Vec<Vec<f64>>,

    /// Drug and tumor histories, starting with the initial conditions
    pub csf1r: Vec<f64>,
    pub igf1r: Vec<f64>,
    pub tumor_expectation: Vec<f64>,

    /// Administered doses per step
    pub dose_csf1r: Vec<f64>,
    pub dose_igf1r: Vec<f64>,
}

impl Trajectory {
    pub fn steps(&self) -> usize {
        self.times.len()
    }

    /// Per-step probability of not sitting in the last `tail_bins` bins
    pub fn survival_curve(&self, tail_bins: usize) -> Vec<f64> {
        self.densities
            .iter()
            .map(|pdf| {
                let mass: f64 = pdf.iter().sum();
                if mass <= 0.0 {
                    return 0.0;
                }
                let tail_start = pdf.len().saturating_sub(tail_bins);
                let tail: f64 = pdf[tail_start..].iter().sum();
                1.0 - tail / mass
            })
            .collect()
    }
}

/// Run `schedule` through the surrogate with the configured interval and bins
pub fn rollout(
    surrogate: &SurrogateModel,
    schedule: &TreatmentSchedule,
    config: &SimulationConfig,
) -> SimResult<Trajectory> {
    let interval = config.decision_interval;
    let bins = config.concentration_bins();
    let actions = schedule.expand(interval);
    let space = DoseSpace::binary();
    let n = actions.len();

    let mut traj = Trajectory {
        schedule: schedule.name.clone(),
        interval,
        bin_width: config.bin_width,
        bins: bins.clone(),
        times: Vec::with_capacity(n),
        densities: Vec::with_capacity(n),
        csf1r: Vec::with_capacity(n + 1),
        igf1r: Vec::with_capacity(n + 1),
        tumor_expectation: Vec::with_capacity(n + 1),
        dose_csf1r: Vec::with_capacity(n),
        dose_igf1r: Vec::with_capacity(n),
    };
    traj.csf1r.push(config.initial.csf1r_concentration);
    traj.igf1r.push(config.initial.igf1r_concentration);
    traj.tumor_expectation.push(config.initial.tumor_expectation);

    log::info!(
        "rolling out '{}' over {} steps of {} days",
        schedule.name,
        n,
        interval
    );

    let mut cumulative_exposure = 0.0;
    let mut csf1r = config.initial.csf1r_concentration;
    let mut igf1r = config.initial.igf1r_concentration;
    let mut tumor = config.initial.tumor_expectation;

    for (k, action) in actions.iter().enumerate() {
        let dose_c = space.dose(DrugChannel::Csf1rInhibitor, action.csf1r)?;
        let dose_i = space.dose(DrugChannel::Igf1rInhibitor, action.igf1r)?;
        let time = (k + 1) as f64 * interval;

        let output = surrogate.predict(&SurrogateInput {
            bins: &bins,
            time,
            dose_csf1r: dose_c,
            cumulative_exposure,
            dose_igf1r: dose_i,
            csf1r_initial: csf1r,
            igf1r_initial: igf1r,
            tumor_expectation: tumor,
            interval,
        })?;

        cumulative_exposure = output.cumulative_exposure;
        csf1r = output.csf1r_final;
        igf1r = output.igf1r_final;

        let normalized = normalize_density(&output.density);
        tumor = normalized.iter().zip(&bins).map(|(p, c)| p * c).sum();

        traj.times.push(time);
        traj.densities
            .push(normalized.iter().map(|p| p / config.bin_width).collect());
        traj.csf1r.push(csf1r);
        traj.igf1r.push(igf1r);
        traj.tumor_expectation.push(tumor);
        traj.dose_csf1r.push(dose_c);
        traj.dose_igf1r.push(dose_i);
    }

    Ok(traj)
}

/// Survival curve with a leading `1.0` at time zero, held at 1 through the
/// first `grace_steps` steps and forced to be non-increasing
pub fn survival_envelope(curve: &[f64], grace_steps: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(curve.len() + 1);
    out.push(1.0);
    for (j, &s) in curve.iter().enumerate() {
        let j = j + 1;
        let prev = out[j - 1];
        let value = if j <= grace_steps { 1.0 } else { s };
        out.push(value.min(prev));
    }
    out
}

/// Event record of one virtual subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectOutcome {
    /// Step index of the event, or the curve length when censored
    pub time: usize,
    pub event: bool,
}

/// Split a cohort of `cohort` subjects into deaths and censorings
///
/// At each step the number of survivors drops to `floor(survival * cohort)`;
/// subjects still alive after the second-to-last entry are censored at the
/// curve length.
pub fn time_to_event(curve: &[f64], cohort: usize) -> Vec<SubjectOutcome> {
    let mut alive = cohort;
    let mut outcomes = Vec::with_capacity(cohort);
    for (i, &rate) in curve.iter().take(curve.len().saturating_sub(1)).enumerate() {
        let target = (rate * cohort as f64).floor().max(0.0) as usize;
        let deaths = alive.saturating_sub(target);
        alive -= deaths;
        outcomes.extend(std::iter::repeat(SubjectOutcome { time: i + 1, event: true }).take(deaths));
    }
    outcomes.extend(
        std::iter::repeat(SubjectOutcome {
            time: curve.len(),
            event: false,
        })
        .take(alive),
    );
    outcomes
}
