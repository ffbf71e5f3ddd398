// Compute backend selection
//
// The density network runs on the CPU either serially or split across the
// rayon thread pool. The choice is made once when the surrogate is built and
// never changes the numbers the core produces beyond summation-order noise.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Backend used for the batched density-network forward pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Single-threaded evaluation of the whole batch
    Cpu,

    /// Bin rows split into chunks evaluated on the rayon pool
    CpuParallel,
}

impl BackendKind {
    /// Resolve a backend from its configuration name
    ///
    /// `"auto"` picks `CpuParallel` when the rayon pool has more than one
    /// worker. Accelerator names are recognised but rejected, since no
    /// device backend is compiled in.
    pub fn from_variant_name(name: &str) -> Result<Self, BackendError> {
        match name {
            "cpu" => Ok(BackendKind::Cpu),
            "cpu_parallel" => Ok(BackendKind::CpuParallel),
            "auto" => {
                let threads = rayon::current_num_threads();
                let kind = if threads > 1 {
                    BackendKind::CpuParallel
                } else {
                    BackendKind::Cpu
                };
                log::info!("auto backend resolved to {} ({} threads)", kind, threads);
                Ok(kind)
            }
            "cuda" | "gpu" | "metal" => Err(BackendError::Unavailable(name.to_string())),
            _ => Err(BackendError::UnknownVariant(name.to_string())),
        }
    }

    /// Get the variant name as a string (for serialization/logging)
    pub fn variant_name(&self) -> &'static str {
        match self {
            BackendKind::Cpu => "cpu",
            BackendKind::CpuParallel => "cpu_parallel",
        }
    }

    pub fn is_parallel(&self) -> bool {
        matches!(self, BackendKind::CpuParallel)
    }
}

impl Default for BackendKind {
    fn default() -> Self {
        BackendKind::Cpu
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.variant_name())
    }
}

/// Errors related to backend selection
#[derive(Debug, Clone, PartialEq)]
pub enum BackendError {
    /// Unknown backend name
    UnknownVariant(String),

    /// Backend name is valid but not available in this build
    Unavailable(String),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::UnknownVariant(name) => {
                write!(
                    f,
                    "Unknown backend: '{}'. Expected one of: cpu, cpu_parallel, auto",
                    name
                )
            }
            BackendError::Unavailable(name) => {
                write!(f, "Backend '{}' is not available in this build", name)
            }
        }
    }
}

impl std::error::Error for BackendError {}
