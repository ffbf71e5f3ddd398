// Policy and value networks (inference only)
//
// A stacked LSTM encodes the observation history; an actor head turns each
// encoded timestep into a distribution over joint actions and a critic head
// into a scalar value. Gate layout follows the usual (input, forget, cell,
// output) stacking of the four gate blocks in one weight matrix.

use super::core::{JointAction, Observation};
use crate::error::{SimError, SimResult};
use crate::ml::network::DenseLayer;
use ndarray::{s, Array1, Array2, ArrayView2, Axis};
use rand::distributions::{Distribution, Uniform};
use rand::Rng;
use rand_distr::StandardNormal;

/// Hidden widths shared by the actor and critic heads
pub const HEAD_HIDDEN_WIDTHS: [usize; 5] = [128, 64, 32, 16, 8];

#[inline]
fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Gaussian matrix whose columns are rescaled to Euclidean norm `std`
pub fn normalized_columns<R: Rng + ?Sized>(rows: usize, cols: usize, std: f64, rng: &mut R) -> Array2<f64> {
    let mut out: Array2<f64> = Array2::from_shape_simple_fn((rows, cols), || StandardNormal.sample(&mut *rng));
    for mut column in out.axis_iter_mut(Axis(1)) {
        let norm = column.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm > 0.0 {
            column.mapv_inplace(|v| v * std / norm);
        }
    }
    out
}

fn uniform_matrix<R: Rng + ?Sized>(rows: usize, cols: usize, bound: f64, rng: &mut R) -> Array2<f64> {
    let dist = Uniform::new_inclusive(-bound, bound);
    Array2::from_shape_simple_fn((rows, cols), || dist.sample(&mut *rng))
}

fn uniform_vector<R: Rng + ?Sized>(len: usize, bound: f64, rng: &mut R) -> Array1<f64> {
    let dist = Uniform::new_inclusive(-bound, bound);
    Array1::from_shape_simple_fn(len, || dist.sample(&mut *rng))
}

/// One LSTM layer, gate blocks stacked `[i; f; g; o]`
#[derive(Debug, Clone, PartialEq)]
pub struct LstmLayer {
    pub w_ih: Array2<f64>,
    pub w_hh: Array2<f64>,
    pub b_ih: Array1<f64>,
    pub b_hh: Array1<f64>,
}

impl LstmLayer {
    pub fn new(w_ih: Array2<f64>, w_hh: Array2<f64>, b_ih: Array1<f64>, b_hh: Array1<f64>) -> SimResult<Self> {
        let hidden = w_hh.ncols();
        let gates = 4 * hidden;
        for (what, found) in [
            ("lstm input weight rows", w_ih.nrows()),
            ("lstm hidden weight rows", w_hh.nrows()),
            ("lstm input bias", b_ih.len()),
            ("lstm hidden bias", b_hh.len()),
        ] {
            if found != gates {
                return Err(SimError::DimensionMismatch {
                    what,
                    expected: gates,
                    found,
                });
            }
        }
        Ok(Self { w_ih, w_hh, b_ih, b_hh })
    }

    /// Uniform `[-1/sqrt(hidden), 1/sqrt(hidden)]` initialisation
    pub fn random<R: Rng + ?Sized>(input: usize, hidden: usize, rng: &mut R) -> Self {
        let bound = 1.0 / (hidden as f64).sqrt();
        Self {
            w_ih: uniform_matrix(4 * hidden, input, bound, rng),
            w_hh: uniform_matrix(4 * hidden, hidden, bound, rng),
            b_ih: uniform_vector(4 * hidden, bound, rng),
            b_hh: uniform_vector(4 * hidden, bound, rng),
        }
    }

    pub fn input_dim(&self) -> usize {
        self.w_ih.ncols()
    }

    pub fn hidden_dim(&self) -> usize {
        self.w_hh.ncols()
    }

    /// Run the layer over a `(seq_len, input)` sequence from zero state
    fn forward(&self, seq: ArrayView2<f64>) -> Array2<f64> {
        let h_dim = self.hidden_dim();
        let mut h = Array1::<f64>::zeros(h_dim);
        let mut c = Array1::<f64>::zeros(h_dim);
        let mut out = Array2::zeros((seq.nrows(), h_dim));

        let input_gates = seq.dot(&self.w_ih.t()) + &self.b_ih;
        for (t, x_gates) in input_gates.outer_iter().enumerate() {
            let gates = &x_gates + &self.w_hh.dot(&h) + &self.b_hh;
            for j in 0..h_dim {
                let i = sigmoid(gates[j]);
                let f = sigmoid(gates[h_dim + j]);
                let g = gates[2 * h_dim + j].tanh();
                let o = sigmoid(gates[3 * h_dim + j]);
                c[j] = f * c[j] + i * g;
                h[j] = o * c[j].tanh();
            }
            out.row_mut(t).assign(&h);
        }
        out
    }
}

/// Stacked LSTM over observation histories
#[derive(Debug, Clone, PartialEq)]
pub struct LstmEncoder {
    layers: Vec<LstmLayer>,
}

impl LstmEncoder {
    pub fn from_layers(layers: Vec<LstmLayer>) -> SimResult<Self> {
        if layers.is_empty() {
            return Err(SimError::DimensionMismatch {
                what: "lstm depth",
                expected: 1,
                found: 0,
            });
        }
        for pair in layers.windows(2) {
            if pair[0].hidden_dim() != pair[1].input_dim() {
                return Err(SimError::DimensionMismatch {
                    what: "lstm layer chaining",
                    expected: pair[0].hidden_dim(),
                    found: pair[1].input_dim(),
                });
            }
        }
        Ok(Self { layers })
    }

    pub fn random<R: Rng + ?Sized>(input: usize, hidden: usize, num_layers: usize, rng: &mut R) -> SimResult<Self> {
        let layers = (0..num_layers)
            .map(|k| LstmLayer::random(if k == 0 { input } else { hidden }, hidden, &mut *rng))
            .collect();
        Self::from_layers(layers)
    }

    pub fn input_dim(&self) -> usize {
        self.layers[0].input_dim()
    }

    pub fn hidden_dim(&self) -> usize {
        self.layers[self.layers.len() - 1].hidden_dim()
    }

    /// Hidden output for every timestep, `(seq_len, hidden)`
    pub fn forward(&self, seq: ArrayView2<f64>) -> SimResult<Array2<f64>> {
        if seq.ncols() != self.input_dim() {
            return Err(SimError::DimensionMismatch {
                what: "lstm input columns",
                expected: self.input_dim(),
                found: seq.ncols(),
            });
        }
        let mut x = seq.to_owned();
        for layer in &self.layers {
            x = layer.forward(x.view());
        }
        Ok(x)
    }
}

/// Fully connected head with ReLU between layers
#[derive(Debug, Clone, PartialEq)]
pub struct MlpHead {
    layers: Vec<DenseLayer>,
}

impl MlpHead {
    /// Weights from `normalized_columns(std)`, biases uniform in `[-1/sqrt(fan_in), 1/sqrt(fan_in)]`
    pub fn random<R: Rng + ?Sized>(input: usize, output: usize, std: f64, rng: &mut R) -> SimResult<Self> {
        let widths: Vec<usize> = std::iter::once(input)
            .chain(HEAD_HIDDEN_WIDTHS)
            .chain(std::iter::once(output))
            .collect();
        let mut layers = Vec::with_capacity(widths.len() - 1);
        for pair in widths.windows(2) {
            let (fan_in, fan_out) = (pair[0], pair[1]);
            let weight = normalized_columns(fan_out, fan_in, std, rng);
            let bias = uniform_vector(fan_out, 1.0 / (fan_in as f64).sqrt(), rng);
            layers.push(DenseLayer::new(weight, bias)?);
        }
        Self::from_layers(layers)
    }

    pub fn from_layers(layers: Vec<DenseLayer>) -> SimResult<Self> {
        if layers.is_empty() {
            return Err(SimError::DimensionMismatch {
                what: "head depth",
                expected: 1,
                found: 0,
            });
        }
        for pair in layers.windows(2) {
            if pair[0].out_dim() != pair[1].in_dim() {
                return Err(SimError::DimensionMismatch {
                    what: "head layer chaining",
                    expected: pair[0].out_dim(),
                    found: pair[1].in_dim(),
                });
            }
        }
        Ok(Self { layers })
    }

    pub fn output_dim(&self) -> usize {
        self.layers[self.layers.len() - 1].out_dim()
    }

    pub fn forward(&self, x: ArrayView2<f64>) -> SimResult<Array2<f64>> {
        let expected = self.layers[0].in_dim();
        if x.ncols() != expected {
            return Err(SimError::DimensionMismatch {
                what: "head input columns",
                expected,
                found: x.ncols(),
            });
        }
        let last = self.layers.len() - 1;
        let mut x = x.to_owned();
        for (i, layer) in self.layers.iter().enumerate() {
            x = layer.apply(&x.view());
            if i < last {
                x.mapv_inplace(|v| v.max(0.0));
            }
        }
        Ok(x)
    }
}

/// Row-wise softmax
pub fn softmax_rows(logits: &Array2<f64>) -> Array2<f64> {
    let mut out = logits.clone();
    for mut row in out.outer_iter_mut() {
        let max = row.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let total = row.sum();
        row.mapv_inplace(|v| v / total);
    }
    out
}

/// Per-timestep policy and value estimates
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyEvaluation {
    /// `(seq_len, action_size)`, rows sum to one
    pub policy: Array2<f64>,
    pub value: Array1<f64>,
}

impl PolicyEvaluation {
    /// Most likely flat action at the last timestep
    pub fn greedy_action(&self) -> Option<usize> {
        let last = self.policy.outer_iter().last()?;
        last.iter()
            .enumerate()
            .fold(None, |best: Option<(usize, f64)>, (i, &p)| match best {
                Some((_, bp)) if bp >= p => best,
                _ => Some((i, p)),
            })
            .map(|(i, _)| i)
    }
}

/// LSTM encoder shared by an actor and a critic
#[derive(Debug, Clone, PartialEq)]
pub struct ActorCritic {
    pub encoder: LstmEncoder,
    pub actor: MlpHead,
    pub critic: MlpHead,
}

impl ActorCritic {
    pub fn new(encoder: LstmEncoder, actor: MlpHead, critic: MlpHead) -> SimResult<Self> {
        if critic.output_dim() != 1 {
            return Err(SimError::DimensionMismatch {
                what: "critic output width",
                expected: 1,
                found: critic.output_dim(),
            });
        }
        Ok(Self {
            encoder,
            actor,
            critic,
        })
    }

    /// Freshly initialised networks; actor std 0.01, critic std 1.0
    pub fn random<R: Rng + ?Sized>(
        input: usize,
        hidden: usize,
        num_layers: usize,
        action_size: usize,
        rng: &mut R,
    ) -> SimResult<Self> {
        let encoder = LstmEncoder::random(input, hidden, num_layers, rng)?;
        let actor = MlpHead::random(hidden, action_size, 0.01, rng)?;
        let critic = MlpHead::random(hidden, 1, 1.0, rng)?;
        Self::new(encoder, actor, critic)
    }

    pub fn action_size(&self) -> usize {
        self.actor.output_dim()
    }

    pub fn evaluate(&self, seq: ArrayView2<f64>) -> SimResult<PolicyEvaluation> {
        let encoded = self.encoder.forward(seq)?;
        let policy = softmax_rows(&self.actor.forward(encoded.view())?);
        let value = self
            .critic
            .forward(encoded.view())?
            .index_axis_move(Axis(1), 0);
        Ok(PolicyEvaluation { policy, value })
    }

    /// Greedy joint action for a windowed history
    pub fn act(&self, seq: ArrayView2<f64>, igf1r_len: usize) -> SimResult<Option<JointAction>> {
        let eval = self.evaluate(seq)?;
        Ok(eval
            .greedy_action()
            .map(|flat| JointAction::from_flat(flat, igf1r_len)))
    }
}

/// Fixed-length `(len, 2)` window over the most recent observations
///
/// Shorter histories are left-padded with zero rows.
pub fn window_observations(history: &[Observation], len: usize) -> Array2<f64> {
    let mut out = Array2::zeros((len, 2));
    let take = history.len().min(len);
    let recent = &history[history.len() - take..];
    let mut rows = out.slice_mut(s![len - take.., ..]);
    for (mut row, obs) in rows.outer_iter_mut().zip(recent) {
        row[0] = obs.state_survival;
        row[1] = obs.survival_delta;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2, Array};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_normalized_columns() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let w = normalized_columns(16, 4, 0.01, &mut rng);
        for column in w.axis_iter(Axis(1)) {
            let norm = column.iter().map(|v| v * v).sum::<f64>().sqrt();
            assert!((norm - 0.01).abs() < 1e-12);
        }
    }

    #[test]
    fn test_single_lstm_step_by_hand() {
        let layer = LstmLayer::new(
            Array2::ones((4, 1)),
            Array2::zeros((4, 1)),
            Array1::zeros(4),
            Array1::zeros(4),
        )
        .unwrap();
        let encoder = LstmEncoder::from_layers(vec![layer]).unwrap();
        let out = encoder.forward(arr2(&[[1.0]]).view()).unwrap();

        let s = sigmoid(1.0);
        let c = s * 1f64.tanh();
        assert!((out[[0, 0]] - s * c.tanh()).abs() < 1e-15);
    }

    #[test]
    fn test_encoder_is_causal() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let encoder = LstmEncoder::random(2, 8, 2, &mut rng).unwrap();
        let seq = Array::from_shape_fn((6, 2), |(t, j)| (t as f64 * 0.3 - j as f64).sin());

        let full = encoder.forward(seq.view()).unwrap();
        let prefix = encoder.forward(seq.slice(s![..3, ..])).unwrap();
        for (a, b) in full.slice(s![..3, ..]).iter().zip(prefix.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_policy_rows_sum_to_one() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let net = ActorCritic::random(2, 16, 1, 4, &mut rng).unwrap();
        let seq = window_observations(&[Observation::new(0.5, 0.0), Observation::new(0.4, -0.1)], 5);

        let eval = net.evaluate(seq.view()).unwrap();
        assert_eq!(eval.policy.dim(), (5, 4));
        assert_eq!(eval.value.len(), 5);
        for row in eval.policy.outer_iter() {
            assert!((row.sum() - 1.0).abs() < 1e-12);
            assert!(row.iter().all(|&p| p > 0.0));
        }

        let action = net.act(seq.view(), 2).unwrap().unwrap();
        assert!(action.csf1r < 2 && action.igf1r < 2);
    }

    #[test]
    fn test_softmax_is_shift_invariant() {
        let a = softmax_rows(&arr2(&[[1.0, 2.0, 3.0]]));
        let b = softmax_rows(&arr2(&[[1001.0, 1002.0, 1003.0]]));
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-12);
        }
    }

    #[test]
    fn test_greedy_action_picks_largest() {
        let eval = PolicyEvaluation {
            policy: arr2(&[[0.9, 0.1], [0.2, 0.8]]),
            value: arr1(&[0.0, 0.0]),
        };
        assert_eq!(eval.greedy_action(), Some(1));
    }

    #[test]
    fn test_window_pads_and_truncates() {
        let history: Vec<Observation> = (0..4).map(|i| Observation::new(i as f64, -(i as f64))).collect();

        let padded = window_observations(&history[..2], 4);
        assert_eq!(padded, arr2(&[[0.0, 0.0], [0.0, 0.0], [0.0, 0.0], [1.0, -1.0]]));

        let recent = window_observations(&history, 2);
        assert_eq!(recent, arr2(&[[2.0, -2.0], [3.0, -3.0]]));

        assert_eq!(window_observations(&[], 3), Array2::<f64>::zeros((3, 2)));
    }

    #[test]
    fn test_dimension_checks() {
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let net = ActorCritic::random(2, 4, 1, 4, &mut rng).unwrap();
        let bad = Array2::<f64>::zeros((3, 3));
        assert!(matches!(
            net.evaluate(bad.view()),
            Err(SimError::DimensionMismatch { expected: 2, found: 3, .. })
        ));

        let actor = MlpHead::random(4, 4, 0.01, &mut rng).unwrap();
        let critic = MlpHead::random(4, 2, 1.0, &mut rng).unwrap();
        let encoder = LstmEncoder::random(2, 4, 1, &mut rng).unwrap();
        assert!(ActorCritic::new(encoder, actor, critic).is_err());
    }
}
