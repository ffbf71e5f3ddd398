// Learned surrogate runtime
//
// Input normalisation, the density network, the trained parameter store,
// backend selection, and the composed surrogate model.

pub mod backend;
pub mod features;
pub mod network;
pub mod params;
pub mod surrogate;

pub use backend::{BackendError, BackendKind};
pub use features::{FeatureMap, FEATURE_DIM};
pub use network::{DenseLayer, DensityNetwork};
pub use params::{KineticBlob, ModelParameters, StateDict, Tensor};
pub use surrogate::{SurrogateInput, SurrogateModel, SurrogateOutput};
