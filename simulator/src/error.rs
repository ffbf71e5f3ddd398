// Error types for the surrogate engine
//
// Loading failures are fatal at startup; everything raised from the step loop
// is a precondition violation and aborts the episode.

use crate::ml::backend::BackendError;
use std::path::PathBuf;

/// Errors raised while reading the trained parameter store
#[derive(Debug, thiserror::Error)]
pub enum ModelLoadError {
    #[error("IO error reading parameter blob '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON parse error in parameter blob '{path}': {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("missing tensor '{0}' in network state dictionary")]
    MissingTensor(String),

    #[error("tensor '{name}' has shape {found:?}, expected {expected:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("expected {expected} kinetic log-parameters, found {found}")]
    KineticLength { expected: usize, found: usize },

    #[error("declared {expected} layers but network provides {found}")]
    LayerCount { expected: usize, found: usize },

    #[error("non-finite value in '{0}'")]
    NonFinite(String),
}

/// Errors raised by the simulation core
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error(transparent)]
    ModelLoad(#[from] ModelLoadError),

    #[error("dimension mismatch in {what}: expected {expected}, found {found}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("interval {interval} holds no whole substep of size {substep}")]
    InvalidInterval { interval: f64, substep: f64 },

    #[error("action index {index} out of range for {channel} dose space of size {len}")]
    InvalidAction {
        channel: &'static str,
        index: usize,
        len: usize,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type SimResult<T> = Result<T, SimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SimError::DimensionMismatch {
            what: "feature columns",
            expected: 5,
            found: 4,
        };
        assert!(format!("{}", err).contains("expected 5, found 4"));

        let err = SimError::InvalidInterval {
            interval: 0.01,
            substep: 0.02,
        };
        assert!(format!("{}", err).contains("no whole substep"));

        let err: SimError = ModelLoadError::KineticLength {
            expected: 16,
            found: 15,
        }
        .into();
        assert!(format!("{}", err).contains("expected 16 kinetic log-parameters"));
    }
}
