// Input normalisation for the density network
//
// Every column is mapped linearly onto [-1, 1]. Values outside the training
// range are extrapolated, matching how the network was queried when its
// validation curves were produced.

use crate::config::Bounds;
use crate::error::{SimError, SimResult};
use ndarray::Array2;

/// Number of input columns the density network expects
pub const FEATURE_DIM: usize = 5;

/// Column positions in the feature matrix
pub mod column {
    pub const TIME: usize = 0;
    pub const CONCENTRATION: usize = 1;
    pub const CSF1R: usize = 2;
    pub const CUMULATIVE: usize = 3;
    pub const IGF1R: usize = 4;
}

#[inline]
fn rescale(x: f64, lo: f64, hi: f64) -> f64 {
    2.0 * (x - lo) / (hi - lo) - 1.0
}

/// Maps raw inputs onto the network's [-1, 1] ranges
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureMap {
    bounds: Bounds,
    cumulative_max: f64,
}

impl FeatureMap {
    /// `cumulative_max` is normally `200 / substep`
    pub fn new(bounds: Bounds, cumulative_max: f64) -> Self {
        Self {
            bounds,
            cumulative_max,
        }
    }

    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    pub fn cumulative_max(&self) -> f64 {
        self.cumulative_max
    }

    pub fn time(&self, t: f64) -> f64 {
        rescale(t, self.bounds.time.0, self.bounds.time.1)
    }

    pub fn concentration(&self, c: f64) -> f64 {
        rescale(c, self.bounds.concentration.0, self.bounds.concentration.1)
    }

    /// Instantaneous drug inputs live on [0, 1]
    pub fn dose(&self, d: f64) -> f64 {
        2.0 * d - 1.0
    }

    pub fn cumulative(&self, cum: f64) -> f64 {
        2.0 * cum / self.cumulative_max - 1.0
    }

    /// Build one row per concentration bin with the scalar inputs broadcast
    pub fn normalize_rows(
        &self,
        time: f64,
        bins: &[f64],
        csf1r: f64,
        cumulative: f64,
        igf1r: f64,
    ) -> Array2<f64> {
        let n = bins.len();
        self.log_out_of_domain(time, bins, csf1r, igf1r);

        let t = self.time(time);
        let d_c = self.dose(csf1r);
        let cum = self.cumulative(cumulative);
        let d_i = self.dose(igf1r);

        let mut features = Array2::zeros((n, FEATURE_DIM));
        for (mut row, &c) in features.outer_iter_mut().zip(bins) {
            row[column::TIME] = t;
            row[column::CONCENTRATION] = self.concentration(c);
            row[column::CSF1R] = d_c;
            row[column::CUMULATIVE] = cum;
            row[column::IGF1R] = d_i;
        }
        features
    }

    /// Column-wise variant for callers holding one value per row
    pub fn normalize_columns(
        &self,
        time: &[f64],
        concentration: &[f64],
        csf1r: &[f64],
        cumulative: &[f64],
        igf1r: &[f64],
    ) -> SimResult<Array2<f64>> {
        let n = concentration.len();
        for (what, len) in [
            ("time column", time.len()),
            ("csf1r column", csf1r.len()),
            ("cumulative column", cumulative.len()),
            ("igf1r column", igf1r.len()),
        ] {
            if len != n {
                return Err(SimError::DimensionMismatch {
                    what,
                    expected: n,
                    found: len,
                });
            }
        }

        Ok(Array2::from_shape_fn((n, FEATURE_DIM), |(i, j)| match j {
            column::TIME => self.time(time[i]),
            column::CONCENTRATION => self.concentration(concentration[i]),
            column::CSF1R => self.dose(csf1r[i]),
            column::CUMULATIVE => self.cumulative(cumulative[i]),
            _ => self.dose(igf1r[i]),
        }))
    }

    fn log_out_of_domain(&self, time: f64, bins: &[f64], csf1r: f64, igf1r: f64) {
        if !log::log_enabled!(log::Level::Debug) {
            return;
        }
        let (t_lo, t_hi) = self.bounds.time;
        if time < t_lo || time > t_hi {
            log::debug!("time {} outside [{}, {}], extrapolating", time, t_lo, t_hi);
        }
        let (c_lo, c_hi) = self.bounds.concentration;
        if bins.iter().any(|&c| c < c_lo || c > c_hi) {
            log::debug!("concentration bins extend outside [{}, {}]", c_lo, c_hi);
        }
        for (name, d) in [("csf1r", csf1r), ("igf1r", igf1r)] {
            if !(0.0..=1.0).contains(&d) {
                log::debug!("{} input {} outside [0, 1], extrapolating", name, d);
            }
        }
    }
}
