//! Closed-form pharmacokinetics for the two inhibitors.
//!
//! Each drug follows the linear ODE `dc/dt = a * dose - (a + b) * c` with the
//! dose held constant over a decision interval. Over one substep `dt` the
//! exact solution is
//!
//! ```text
//! c[k+1] = (c[k] - a*dose/(a+b)) * exp(-(a+b)*dt) + a*dose/(a+b)
//! ```
//!
//! which is applied `interval / dt` times (truncated toward zero).

use crate::config::{DrugConstants, KineticConstants, KINETIC_PARAM_COUNT};
use crate::error::{SimError, SimResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The two modelled drugs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DrugChannel {
    Csf1rInhibitor,
    Igf1rInhibitor,
}

impl DrugChannel {
    /// Indices of (production, clearance, tumor-coupled clearance) in the
    /// trained log-parameter vector
    fn param_indices(&self) -> (usize, usize, usize) {
        match self {
            DrugChannel::Csf1rInhibitor => (10, 11, 12),
            DrugChannel::Igf1rInhibitor => (13, 14, 15),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DrugChannel::Csf1rInhibitor => "CSF1R-I",
            DrugChannel::Igf1rInhibitor => "IGF1R-I",
        }
    }
}

impl fmt::Display for DrugChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Production rate `a` and clearance rate `b` of one drug
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KineticRates {
    pub a: f64,
    pub b: f64,
}

impl KineticRates {
    pub fn new(a: f64, b: f64) -> Self {
        Self { a, b }
    }

    /// Derive the rates of `channel` from the trained log-parameters
    ///
    /// Only the IGF1R inhibitor's clearance depends on the tumor-cell
    /// expectation; it is ignored for the CSF1R inhibitor.
    pub fn for_channel(
        channel: DrugChannel,
        log_params: &[f64; KINETIC_PARAM_COUNT],
        constants: &KineticConstants,
        tumor_expectation: f64,
    ) -> Self {
        let (i_q, i_eta, i_mu) = channel.param_indices();
        let drug: &DrugConstants = match channel {
            DrugChannel::Csf1rInhibitor => &constants.csf1r,
            DrugChannel::Igf1rInhibitor => &constants.igf1r,
        };

        let a = log_params[i_q].exp() * drug.q;
        let coupled = log_params[i_mu].exp() * drug.mu;
        let b = match channel {
            DrugChannel::Csf1rInhibitor => log_params[i_eta].exp() * drug.eta + coupled,
            DrugChannel::Igf1rInhibitor => {
                log_params[i_eta].exp() * drug.eta + coupled * tumor_expectation
            }
        };

        Self { a, b }
    }

    /// Concentration the channel relaxes to under a constant dose
    pub fn steady_state(&self, dose: f64) -> f64 {
        self.a * dose / (self.a + self.b)
    }

    /// One exact substep of length `dt`
    #[inline]
    pub fn advance(&self, c: f64, dose: f64, dt: f64) -> f64 {
        let c_inf = self.steady_state(dose);
        (c - c_inf) * (-(self.a + self.b) * dt).exp() + c_inf
    }
}

/// Ratios this close to an integer count as exact multiples of the substep
pub const MULTIPLE_TOLERANCE: f64 = 1e-9;

/// Number of whole substeps in `interval`
///
/// Exact multiples (up to floating-point error) give the nearest integer;
/// anything else is truncated toward zero.
pub fn substep_count(interval: f64, substep: f64) -> SimResult<usize> {
    let ratio = interval / substep;
    if !ratio.is_finite() {
        return Err(SimError::InvalidInterval { interval, substep });
    }
    let nearest = ratio.round();
    let count = if (ratio - nearest).abs() <= MULTIPLE_TOLERANCE {
        nearest
    } else {
        ratio.floor()
    };
    if count < 1.0 {
        return Err(SimError::InvalidInterval { interval, substep });
    }
    Ok(count as usize)
}

/// Advance `c0` across `interval` and return every substep value
///
/// The first entry is one substep after `c0`; `c0` itself is not included.
pub fn integrate(
    rates: &KineticRates,
    c0: f64,
    dose: f64,
    interval: f64,
    substep: f64,
) -> SimResult<Vec<f64>> {
    let n = substep_count(interval, substep)?;
    let mut trajectory = Vec::with_capacity(n);
    let mut c = c0;
    for _ in 0..n {
        c = rates.advance(c, dose, substep);
        trajectory.push(c);
    }
    Ok(trajectory)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f64 = 1.0 / 48.0;

    fn zero_params() -> [f64; KINETIC_PARAM_COUNT] {
        [0.0; KINETIC_PARAM_COUNT]
    }

    #[test]
    fn test_rates_from_zero_log_params() {
        let constants = KineticConstants::default();
        let params = zero_params();

        let csf = KineticRates::for_channel(DrugChannel::Csf1rInhibitor, &params, &constants, 0.58);
        assert!((csf.a - 0.8).abs() < 1e-15);
        assert!((csf.b - 4e-3).abs() < 1e-15);

        let igf = KineticRates::for_channel(DrugChannel::Igf1rInhibitor, &params, &constants, 0.5);
        assert!((igf.a - 0.8).abs() < 1e-15);
        assert!((igf.b - (2e-3 + 2e-3 * 0.5)).abs() < 1e-15);
    }

    #[test]
    fn test_tumor_coupling_only_affects_igf1r() {
        let constants = KineticConstants::default();
        let mut params = zero_params();
        params[12] = 1.0;
        params[15] = 1.0;

        let csf_lo = KineticRates::for_channel(DrugChannel::Csf1rInhibitor, &params, &constants, 0.1);
        let csf_hi = KineticRates::for_channel(DrugChannel::Csf1rInhibitor, &params, &constants, 0.9);
        assert_eq!(csf_lo, csf_hi);

        let igf_lo = KineticRates::for_channel(DrugChannel::Igf1rInhibitor, &params, &constants, 0.1);
        let igf_hi = KineticRates::for_channel(DrugChannel::Igf1rInhibitor, &params, &constants, 0.9);
        assert!(igf_hi.b > igf_lo.b);
    }

    #[test]
    fn test_integrate_length_and_first_value() {
        let rates = KineticRates::new(0.8, 0.004);
        for multiple in [1usize, 2, 4, 48] {
            let interval = multiple as f64 * DT;
            let traj = integrate(&rates, 0.3, 1.0, interval, DT).unwrap();
            assert_eq!(traj.len(), multiple);

            let c_inf = 0.8 / 0.804;
            let expected = (0.3 - c_inf) * (-(0.804) * DT).exp() + c_inf;
            assert!((traj[0] - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn test_every_exact_multiple_keeps_all_substeps() {
        let rates = KineticRates::new(0.8, 0.004);
        for m in 1..=96usize {
            let interval = m as f64 * DT;
            assert_eq!(substep_count(interval, DT).unwrap(), m, "multiple {}", m);
            assert_eq!(integrate(&rates, 0.3, 1.0, interval, DT).unwrap().len(), m);
        }
    }

    #[test]
    fn test_truncation_and_empty_interval() {
        assert_eq!(substep_count(2.5 * DT, DT).unwrap(), 2);
        assert_eq!(substep_count(2.999 * DT, DT).unwrap(), 2);
        // 7 * (1/48) / (1/48) lands just under 7 in floating point
        assert!(7.0 * DT / DT < 7.0);
        assert_eq!(substep_count(7.0 * DT, DT).unwrap(), 7);
        assert!(matches!(
            substep_count(0.5 * DT, DT),
            Err(SimError::InvalidInterval { .. })
        ));
        assert!(substep_count(DT, 0.0).is_err());
    }

    #[test]
    fn test_converges_to_steady_state() {
        let rates = KineticRates::new(0.8, 0.2);
        let traj = integrate(&rates, 0.0, 1.0, 2000.0 * DT * 48.0, DT).unwrap();
        let last = *traj.last().unwrap();
        assert!((last - rates.steady_state(1.0)).abs() < 1e-9);
        assert!((rates.steady_state(1.0) - 0.8).abs() < 1e-15);
    }

    #[test]
    fn test_zero_dose_zero_concentration_stays_zero() {
        let rates = KineticRates::new(0.8, 0.004);
        let traj = integrate(&rates, 0.0, 0.0, 1.0, DT).unwrap();
        assert!(traj.iter().all(|&c| c == 0.0));
    }

    #[test]
    fn test_washout_is_monotone() {
        let rates = KineticRates::new(0.8, 0.004);
        let traj = integrate(&rates, 0.9, 0.0, 1.0, DT).unwrap();
        assert!(traj.windows(2).all(|w| w[1] < w[0]));
    }
}
