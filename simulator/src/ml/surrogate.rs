// Surrogate model
//
// Composes the two pharmacokinetic channels with the density network: the
// drugs are advanced over the interval first, then their end-of-interval
// levels and the updated cumulative exposure are fed to the network together
// with every concentration bin.

use super::backend::BackendKind;
use super::features::FeatureMap;
use super::params::ModelParameters;
use crate::config::{KineticConstants, SimulationConfig};
use crate::error::{SimError, SimResult};
use crate::pk::{self, DrugChannel, KineticRates};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Inputs of one surrogate prediction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurrogateInput<'a> {
    /// Tumor-cell concentration bins, one network row each
    pub bins: &'a [f64],

    /// Time at the end of the interval
    pub time: f64,

    /// CSF1R inhibitor dose held over the interval
    pub dose_csf1r: f64,

    /// Cumulative CSF1R inhibitor exposure before the interval
    pub cumulative_exposure: f64,

    /// IGF1R inhibitor dose held over the interval
    pub dose_igf1r: f64,

    pub csf1r_initial: f64,
    pub igf1r_initial: f64,

    /// Tumor-cell expectation at the start of the interval
    pub tumor_expectation: f64,

    /// Interval length in days
    pub interval: f64,
}

/// Result of one surrogate prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurrogateOutput {
    /// Unnormalised density per bin, clamped to be non-negative
    pub density: Vec<f64>,

    /// Cumulative CSF1R inhibitor exposure after the interval
    pub cumulative_exposure: f64,

    pub csf1r_final: f64,
    pub igf1r_final: f64,

    /// Substep trajectories, kept for diagnostics
    pub csf1r_trajectory: Vec<f64>,
    pub igf1r_trajectory: Vec<f64>,
}

/// Read-only surrogate shared by any number of environments
#[derive(Debug, Clone)]
pub struct SurrogateModel {
    params: Arc<ModelParameters>,
    features: FeatureMap,
    constants: KineticConstants,
    substep: f64,
    backend: BackendKind,
}

impl SurrogateModel {
    pub fn new(params: Arc<ModelParameters>, config: &SimulationConfig) -> SimResult<Self> {
        let backend = config.backend_kind()?;
        let widths = params.network().widths();
        if widths.first() != Some(&super::features::FEATURE_DIM) {
            return Err(SimError::DimensionMismatch {
                what: "network input width",
                expected: super::features::FEATURE_DIM,
                found: widths[0],
            });
        }
        log::info!("surrogate ready on {} backend, substep {}", backend, config.substep);

        Ok(Self {
            params,
            features: FeatureMap::new(config.bounds, config.cumulative_max()),
            constants: config.kinetics,
            substep: config.substep,
            backend,
        })
    }

    pub fn params(&self) -> &ModelParameters {
        &self.params
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn substep(&self) -> f64 {
        self.substep
    }

    pub fn feature_map(&self) -> &FeatureMap {
        &self.features
    }

    /// Rates of one channel at a given tumor-cell expectation
    pub fn rates(&self, channel: DrugChannel, tumor_expectation: f64) -> KineticRates {
        KineticRates::for_channel(
            channel,
            self.params.log_params(),
            &self.constants,
            tumor_expectation,
        )
    }

    /// Predict the density over `input.bins` at the end of the interval
    pub fn predict(&self, input: &SurrogateInput<'_>) -> SimResult<SurrogateOutput> {
        let csf1r = pk::integrate(
            &self.rates(DrugChannel::Csf1rInhibitor, input.tumor_expectation),
            input.csf1r_initial,
            input.dose_csf1r,
            input.interval,
            self.substep,
        )?;
        let igf1r = pk::integrate(
            &self.rates(DrugChannel::Igf1rInhibitor, input.tumor_expectation),
            input.igf1r_initial,
            input.dose_igf1r,
            input.interval,
            self.substep,
        )?;

        let cumulative_exposure = input.cumulative_exposure + csf1r.iter().sum::<f64>();
        // integrate() never returns an empty trajectory
        let csf1r_final = csf1r[csf1r.len() - 1];
        let igf1r_final = igf1r[igf1r.len() - 1];

        let features = self.features.normalize_rows(
            input.time,
            input.bins,
            csf1r_final,
            cumulative_exposure,
            igf1r_final,
        );
        let raw: Array1<f64> = self
            .params
            .network()
            .forward(features.view(), self.backend)?;
        if raw.len() != input.bins.len() {
            return Err(SimError::DimensionMismatch {
                what: "density vector",
                expected: input.bins.len(),
                found: raw.len(),
            });
        }

        let density: Vec<f64> = raw.iter().map(|&p| if p < 0.0 { 0.0 } else { p }).collect();

        log::debug!(
            "predict t={:.4}: csf1r={:.5} igf1r={:.5} cum={:.3} mass={:.5}",
            input.time,
            csf1r_final,
            igf1r_final,
            cumulative_exposure,
            density.iter().sum::<f64>()
        );

        Ok(SurrogateOutput {
            density,
            cumulative_exposure,
            csf1r_final,
            igf1r_final,
            csf1r_trajectory: csf1r,
            igf1r_trajectory: igf1r,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KINETIC_PARAM_COUNT;
    use crate::ml::network::{DenseLayer, DensityNetwork};
    use ndarray::{array, Array1, Array2};

    /// Output equals the normalised concentration column minus `offset`
    fn linear_surrogate(offset: f64) -> SurrogateModel {
        let layer = DenseLayer::new(array![[0.0, 1.0, 0.0, 0.0, 0.0]], array![-offset]).unwrap();
        let network = DensityNetwork::from_layers(vec![layer]).unwrap();
        let params = ModelParameters::from_parts([0.0; KINETIC_PARAM_COUNT], network);
        SurrogateModel::new(Arc::new(params), &SimulationConfig::default()).unwrap()
    }

    fn input(bins: &[f64]) -> SurrogateInput<'_> {
        SurrogateInput {
            bins,
            time: 1.0 / 48.0,
            dose_csf1r: 1.0,
            cumulative_exposure: 0.0,
            dose_igf1r: 0.0,
            csf1r_initial: 0.0,
            igf1r_initial: 0.0,
            tumor_expectation: 0.58,
            interval: 1.0 / 48.0,
        }
    }

    #[test]
    fn test_negative_outputs_are_clamped() {
        let model = linear_surrogate(0.0);
        let bins = SimulationConfig::default().concentration_bins();
        let out = model.predict(&input(&bins)).unwrap();

        assert_eq!(out.density.len(), bins.len());
        assert!(out.density.iter().all(|&p| p >= 0.0));
        // lower half of the bins maps below zero
        assert_eq!(out.density[0], 0.0);
        assert!(out.density[99] > 0.9);
    }

    #[test]
    fn test_all_negative_network_yields_zero_density() {
        let model = linear_surrogate(10.0);
        let bins = [0.1, 0.5, 0.9];
        let out = model.predict(&input(&bins)).unwrap();
        assert_eq!(out.density, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_kinetics_and_cumulative_exposure() {
        let model = linear_surrogate(0.0);
        let bins = [0.5];
        let mut inp = input(&bins);
        inp.cumulative_exposure = 2.0;
        inp.interval = 4.0 / 48.0;

        let out = model.predict(&inp).unwrap();
        assert_eq!(out.csf1r_trajectory.len(), 4);
        assert_eq!(out.csf1r_final, out.csf1r_trajectory[3]);

        let sum: f64 = out.csf1r_trajectory.iter().sum();
        assert!((out.cumulative_exposure - (2.0 + sum)).abs() < 1e-12);

        let rates = model.rates(DrugChannel::Csf1rInhibitor, 0.58);
        let first = rates.advance(0.0, 1.0, 1.0 / 48.0);
        assert!((out.csf1r_trajectory[0] - first).abs() < 1e-15);

        // IGF1R-I was neither present nor dosed
        assert!(out.igf1r_trajectory.iter().all(|&c| c == 0.0));
    }

    #[test]
    fn test_network_sees_final_levels() {
        // Output reads the CSF1R column directly: 2 * c_final - 1
        let layer = DenseLayer::new(array![[0.0, 0.0, 1.0, 0.0, 0.0]], Array1::zeros(1)).unwrap();
        let network = DensityNetwork::from_layers(vec![layer]).unwrap();
        let params = ModelParameters::from_parts([0.0; KINETIC_PARAM_COUNT], network);
        let model = SurrogateModel::new(Arc::new(params), &SimulationConfig::default()).unwrap();

        let bins = [0.3, 0.6];
        let mut inp = input(&bins);
        inp.csf1r_initial = 0.9;
        inp.dose_csf1r = 1.0;
        let out = model.predict(&inp).unwrap();

        let expected = 2.0 * out.csf1r_final - 1.0;
        assert!((out.density[0] - expected).abs() < 1e-12);
        assert_eq!(out.density[0], out.density[1]);
    }

    #[test]
    fn test_rejects_wrong_input_width() {
        let layer = DenseLayer::new(Array2::zeros((1, 4)), Array1::zeros(1)).unwrap();
        let network = DensityNetwork::from_layers(vec![layer]).unwrap();
        let params = ModelParameters::from_parts([0.0; KINETIC_PARAM_COUNT], network);
        let result = SurrogateModel::new(Arc::new(params), &SimulationConfig::default());
        assert!(matches!(result, Err(SimError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_interval_shorter_than_substep() {
        let model = linear_surrogate(0.0);
        let bins = [0.5];
        let mut inp = input(&bins);
        inp.interval = 0.001;
        assert!(matches!(
            model.predict(&inp),
            Err(SimError::InvalidInterval { .. })
        ));
    }
}
