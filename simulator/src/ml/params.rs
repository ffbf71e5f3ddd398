// Trained parameter store
//
// Two JSON blobs are read once at startup: the kinetic log-parameters and a
// state dictionary holding the density network's layers. The resulting
// `ModelParameters` is immutable and shared by reference.

use super::network::{DenseLayer, DensityNetwork};
use crate::config::KINETIC_PARAM_COUNT;
use crate::error::ModelLoadError;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Kinetic blob layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KineticBlob {
    pub log_p_cyto: Vec<f64>,
}

/// One entry of a network state dictionary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Tensor {
    Vector(Vec<f64>),
    Matrix(Vec<Vec<f64>>),
}

impl Tensor {
    fn shape(&self) -> Vec<usize> {
        match self {
            Tensor::Vector(v) => vec![v.len()],
            Tensor::Matrix(m) => vec![m.len(), m.first().map_or(0, Vec::len)],
        }
    }
}

/// Network state dictionary keyed `layers.layer_{i}.weight` / `.bias`
pub type StateDict = BTreeMap<String, Tensor>;

pub fn weight_key(layer: usize) -> String {
    format!("layers.layer_{}.weight", layer)
}

pub fn bias_key(layer: usize) -> String {
    format!("layers.layer_{}.bias", layer)
}

/// Immutable trained parameters of the surrogate
#[derive(Debug, Clone, PartialEq)]
pub struct ModelParameters {
    log_params: [f64; KINETIC_PARAM_COUNT],
    network: DensityNetwork,
}

impl ModelParameters {
    pub fn from_parts(log_params: [f64; KINETIC_PARAM_COUNT], network: DensityNetwork) -> Self {
        Self {
            log_params,
            network,
        }
    }

    /// Load both blobs and check the network against the declared widths
    pub fn load<P: AsRef<Path>, Q: AsRef<Path>>(
        kinetic_path: P,
        network_path: Q,
        widths: &[usize],
    ) -> Result<Self, ModelLoadError> {
        let kinetic: KineticBlob = read_json(kinetic_path.as_ref())?;
        let state: StateDict = read_json(network_path.as_ref())?;

        let log_params = kinetic_from_blob(&kinetic)?;
        let network = network_from_state_dict(&state, widths)?;

        log::info!(
            "loaded surrogate parameters: {} layers, widths {:?}",
            network.depth(),
            network.widths()
        );
        Ok(Self::from_parts(log_params, network))
    }

    pub fn log_params(&self) -> &[f64; KINETIC_PARAM_COUNT] {
        &self.log_params
    }

    pub fn network(&self) -> &DensityNetwork {
        &self.network
    }

    /// Export the network in the same layout `load` reads
    pub fn to_state_dict(&self) -> StateDict {
        let mut state = StateDict::new();
        for (i, layer) in self.network.layers().iter().enumerate() {
            let rows = layer
                .weight
                .outer_iter()
                .map(|row| row.to_vec())
                .collect();
            state.insert(weight_key(i), Tensor::Matrix(rows));
            state.insert(bias_key(i), Tensor::Vector(layer.bias.to_vec()));
        }
        state
    }

    pub fn to_kinetic_blob(&self) -> KineticBlob {
        KineticBlob {
            log_p_cyto: self.log_params.to_vec(),
        }
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ModelLoadError> {
    let bytes = std::fs::read(path).map_err(|source| ModelLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| ModelLoadError::Json {
        path: path.to_path_buf(),
        source,
    })
}

pub fn kinetic_from_blob(blob: &KineticBlob) -> Result<[f64; KINETIC_PARAM_COUNT], ModelLoadError> {
    let values: [f64; KINETIC_PARAM_COUNT] =
        blob.log_p_cyto
            .as_slice()
            .try_into()
            .map_err(|_| ModelLoadError::KineticLength {
                expected: KINETIC_PARAM_COUNT,
                found: blob.log_p_cyto.len(),
            })?;
    if values.iter().any(|v| !v.is_finite()) {
        return Err(ModelLoadError::NonFinite("log_p_cyto".to_string()));
    }
    Ok(values)
}

/// Rebuild the network from a state dictionary, layer by layer
pub fn network_from_state_dict(
    state: &StateDict,
    widths: &[usize],
) -> Result<DensityNetwork, ModelLoadError> {
    let depth = widths.len().saturating_sub(1);
    let found_layers = state.keys().filter(|k| k.ends_with(".weight")).count();
    if found_layers != depth {
        return Err(ModelLoadError::LayerCount {
            expected: depth,
            found: found_layers,
        });
    }

    let mut layers = Vec::with_capacity(depth);
    for (i, pair) in widths.windows(2).enumerate() {
        let (fan_in, fan_out) = (pair[0], pair[1]);
        let weight = matrix(state, &weight_key(i), fan_out, fan_in)?;
        let bias = vector(state, &bias_key(i), fan_out)?;
        // shapes are checked above, so chaining cannot fail here
        layers.push(DenseLayer { weight, bias });
    }

    DensityNetwork::from_layers(layers).map_err(|_| ModelLoadError::LayerCount {
        expected: depth,
        found: 0,
    })
}

fn lookup<'a>(state: &'a StateDict, name: &str) -> Result<&'a Tensor, ModelLoadError> {
    state
        .get(name)
        .ok_or_else(|| ModelLoadError::MissingTensor(name.to_string()))
}

fn matrix(state: &StateDict, name: &str, rows: usize, cols: usize) -> Result<Array2<f64>, ModelLoadError> {
    let tensor = lookup(state, name)?;
    let mismatch = || ModelLoadError::ShapeMismatch {
        name: name.to_string(),
        expected: vec![rows, cols],
        found: tensor.shape(),
    };
    let data = match tensor {
        Tensor::Matrix(m) => m,
        Tensor::Vector(_) => return Err(mismatch()),
    };
    if data.len() != rows || data.iter().any(|r| r.len() != cols) {
        return Err(mismatch());
    }
    let flat: Vec<f64> = data.iter().flatten().copied().collect();
    if flat.iter().any(|v| !v.is_finite()) {
        return Err(ModelLoadError::NonFinite(name.to_string()));
    }
    Array2::from_shape_vec((rows, cols), flat).map_err(|_| mismatch())
}

fn vector(state: &StateDict, name: &str, len: usize) -> Result<Array1<f64>, ModelLoadError> {
    let tensor = lookup(state, name)?;
    match tensor {
        Tensor::Vector(v) if v.len() == len => {
            if v.iter().any(|x| !x.is_finite()) {
                return Err(ModelLoadError::NonFinite(name.to_string()));
            }
            Ok(Array1::from_vec(v.clone()))
        }
        _ => Err(ModelLoadError::ShapeMismatch {
            name: name.to_string(),
            expected: vec![len],
            found: tensor.shape(),
        }),
    }
}
