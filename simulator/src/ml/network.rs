// Density network
//
// Fully connected, tanh on every hidden layer and identity on the output.
// Inference only: the weights are trained elsewhere and loaded read-only.

use super::backend::BackendKind;
use crate::error::{SimError, SimResult};
use ndarray::{s, Array1, Array2, ArrayView2, Axis};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;

/// Rows evaluated per rayon task by the parallel backend
const PARALLEL_CHUNK_ROWS: usize = 16;

/// One affine layer, weights stored `(out, in)`
#[derive(Debug, Clone, PartialEq)]
pub struct DenseLayer {
    pub weight: Array2<f64>,
    pub bias: Array1<f64>,
}

impl DenseLayer {
    pub fn new(weight: Array2<f64>, bias: Array1<f64>) -> SimResult<Self> {
        if weight.nrows() != bias.len() {
            return Err(SimError::DimensionMismatch {
                what: "layer bias",
                expected: weight.nrows(),
                found: bias.len(),
            });
        }
        Ok(Self { weight, bias })
    }

    pub fn in_dim(&self) -> usize {
        self.weight.ncols()
    }

    pub fn out_dim(&self) -> usize {
        self.weight.nrows()
    }

    pub(crate) fn apply(&self, x: &ArrayView2<f64>) -> Array2<f64> {
        x.dot(&self.weight.t()) + &self.bias
    }
}

/// Feed-forward density network
#[derive(Debug, Clone, PartialEq)]
pub struct DensityNetwork {
    layers: Vec<DenseLayer>,
}

impl DensityNetwork {
    /// Assemble a network, checking that consecutive layers chain
    pub fn from_layers(layers: Vec<DenseLayer>) -> SimResult<Self> {
        if layers.is_empty() {
            return Err(SimError::DimensionMismatch {
                what: "network depth",
                expected: 1,
                found: 0,
            });
        }
        for pair in layers.windows(2) {
            if pair[0].out_dim() != pair[1].in_dim() {
                return Err(SimError::DimensionMismatch {
                    what: "layer chaining",
                    expected: pair[0].out_dim(),
                    found: pair[1].in_dim(),
                });
            }
        }
        Ok(Self { layers })
    }

    /// Variance-scaling initialisation for training from scratch
    ///
    /// Weights are drawn from `N(0, gain^2 * 2 / (fan_in + fan_out))` and
    /// biases are zero. Loaded networks never go through this path.
    pub fn xavier_normal<R: Rng + ?Sized>(widths: &[usize], gain: f64, rng: &mut R) -> SimResult<Self> {
        if widths.len() < 2 {
            return Err(SimError::DimensionMismatch {
                what: "layer widths",
                expected: 2,
                found: widths.len(),
            });
        }
        let mut layers = Vec::with_capacity(widths.len() - 1);
        for pair in widths.windows(2) {
            let (fan_in, fan_out) = (pair[0], pair[1]);
            let std = gain * (2.0 / (fan_in + fan_out) as f64).sqrt();
            let normal = Normal::new(0.0, std)
                .map_err(|e| SimError::Config(format!("invalid init std {}: {}", std, e)))?;
            let weight = Array2::from_shape_simple_fn((fan_out, fan_in), || normal.sample(&mut *rng));
            layers.push(DenseLayer::new(weight, Array1::zeros(fan_out))?);
        }
        Self::from_layers(layers)
    }

    pub fn layers(&self) -> &[DenseLayer] {
        &self.layers
    }

    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    pub fn input_dim(&self) -> usize {
        self.layers[0].in_dim()
    }

    pub fn output_dim(&self) -> usize {
        self.layers[self.layers.len() - 1].out_dim()
    }

    /// Widths input to output, e.g. `[5, 40, ..., 1]`
    pub fn widths(&self) -> Vec<usize> {
        std::iter::once(self.input_dim())
            .chain(self.layers.iter().map(DenseLayer::out_dim))
            .collect()
    }

    /// Evaluate one output value per input row
    pub fn forward(&self, inputs: ArrayView2<f64>, backend: BackendKind) -> SimResult<Array1<f64>> {
        if inputs.ncols() != self.input_dim() {
            return Err(SimError::DimensionMismatch {
                what: "network input columns",
                expected: self.input_dim(),
                found: inputs.ncols(),
            });
        }
        if self.output_dim() != 1 {
            return Err(SimError::DimensionMismatch {
                what: "network output width",
                expected: 1,
                found: self.output_dim(),
            });
        }

        let n = inputs.nrows();
        if backend.is_parallel() && n > PARALLEL_CHUNK_ROWS {
            let starts: Vec<usize> = (0..n).step_by(PARALLEL_CHUNK_ROWS).collect();
            let chunks: Vec<Array1<f64>> = starts
                .par_iter()
                .map(|&start| {
                    let end = (start + PARALLEL_CHUNK_ROWS).min(n);
                    self.forward_rows(inputs.slice(s![start..end, ..]))
                })
                .collect();
            let mut out = Array1::zeros(n);
            for (start, chunk) in starts.iter().zip(chunks) {
                out.slice_mut(s![*start..*start + chunk.len()]).assign(&chunk);
            }
            Ok(out)
        } else {
            Ok(self.forward_rows(inputs))
        }
    }

    fn forward_rows(&self, inputs: ArrayView2<f64>) -> Array1<f64> {
        let last = self.layers.len() - 1;
        let mut x = inputs.to_owned();
        for (i, layer) in self.layers.iter().enumerate() {
            x = layer.apply(&x.view());
            if i < last {
                x.mapv_inplace(f64::tanh);
            }
        }
        x.index_axis_move(Axis(1), 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn tiny_network() -> DensityNetwork {
        // 2 -> 2 (tanh) -> 1
        let hidden = DenseLayer::new(array![[1.0, 0.0], [0.0, -1.0]], array![0.0, 0.5]).unwrap();
        let output = DenseLayer::new(array![[2.0, 1.0]], array![-0.25]).unwrap();
        DensityNetwork::from_layers(vec![hidden, output]).unwrap()
    }

    #[test]
    fn test_forward_matches_hand_computation() {
        let net = tiny_network();
        let x = array![[0.3, 0.1], [-1.0, 2.0]];
        let out = net.forward(x.view(), BackendKind::Cpu).unwrap();

        for (i, row) in x.outer_iter().enumerate() {
            let h0 = (row[0]).tanh();
            let h1 = (-row[1] + 0.5).tanh();
            let expected = 2.0 * h0 + h1 - 0.25;
            assert!((out[i] - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn test_output_layer_is_linear() {
        // A single layer network has no activation at all
        let layer = DenseLayer::new(array![[10.0, 0.0]], array![0.0]).unwrap();
        let net = DensityNetwork::from_layers(vec![layer]).unwrap();
        let out = net.forward(array![[5.0, 0.0]].view(), BackendKind::Cpu).unwrap();
        assert_eq!(out[0], 50.0);
    }

    #[test]
    fn test_forward_is_idempotent() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let net = DensityNetwork::xavier_normal(&[5, 16, 8, 1], 2f64.sqrt(), &mut rng).unwrap();
        let x = Array2::from_shape_fn((40, 5), |(i, j)| (i as f64 * 0.05 - 1.0) * (j as f64 + 1.0) / 5.0);

        let a = net.forward(x.view(), BackendKind::Cpu).unwrap();
        let b = net.forward(x.view(), BackendKind::Cpu).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_parallel_backend_agrees_with_serial() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let net = DensityNetwork::xavier_normal(&[5, 32, 32, 1], 2f64.sqrt(), &mut rng).unwrap();
        let x = Array2::from_shape_fn((100, 5), |(i, j)| ((i * 7 + j * 3) % 11) as f64 / 5.5 - 1.0);

        let serial = net.forward(x.view(), BackendKind::Cpu).unwrap();
        let parallel = net.forward(x.view(), BackendKind::CpuParallel).unwrap();
        assert_eq!(serial.len(), 100);
        for (s, p) in serial.iter().zip(parallel.iter()) {
            assert!((s - p).abs() < 1e-12);
        }
    }

    #[test]
    fn test_xavier_shapes_and_zero_bias() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let widths = [5, 40, 120, 1];
        let net = DensityNetwork::xavier_normal(&widths, 2f64.sqrt(), &mut rng).unwrap();
        assert_eq!(net.widths(), widths.to_vec());
        assert_eq!(net.depth(), 3);
        for layer in net.layers() {
            assert!(layer.bias.iter().all(|&b| b == 0.0));
        }
        assert_eq!(net.layers()[1].weight.dim(), (120, 40));
    }

    #[test]
    fn test_dimension_checks() {
        let net = tiny_network();
        let bad = Array2::<f64>::zeros((3, 5));
        assert!(matches!(
            net.forward(bad.view(), BackendKind::Cpu),
            Err(SimError::DimensionMismatch { expected: 2, found: 5, .. })
        ));

        let a = DenseLayer::new(Array2::zeros((4, 2)), Array1::zeros(4)).unwrap();
        let b = DenseLayer::new(Array2::zeros((1, 3)), Array1::zeros(1)).unwrap();
        assert!(DensityNetwork::from_layers(vec![a, b]).is_err());

        assert!(DenseLayer::new(Array2::zeros((4, 2)), Array1::zeros(3)).is_err());
    }
}
