//! Error types for network build and inference

use crate::shapes::MapGeometry;
use mxp_driver::MxpError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for network operations
pub type Result<T> = std::result::Result<T, CnnError>;

/// Errors that can occur while building or running a network
///
/// None of these is recoverable mid-run: the run aborts and every buffer is
/// released with the network that owns it.
#[derive(Debug, Error)]
pub enum CnnError {
    /// Buffer allocation failed
    #[error("Allocation of {bytes} bytes failed")]
    AllocationFailed {
        /// Bytes requested
        bytes: usize,
    },

    /// Feature-map geometry disagrees with the configured geometry
    #[error("Geometry mismatch at {stage}: expected {expected}, got {actual}")]
    GeometryMismatch {
        /// Where the mismatch was detected
        stage: String,
        /// Configured geometry
        expected: MapGeometry,
        /// Geometry actually presented
        actual: MapGeometry,
    },

    /// Layer kind not known to the dispatcher
    #[error("Unsupported layer kind '{tag}' at index {index}")]
    UnsupportedLayer {
        /// Position in the layer list
        index: usize,
        /// Kind tag from the model configuration
        tag: String,
    },

    /// Known layer asked for something it does not implement
    #[error("Unsupported feature: {feature}")]
    UnsupportedFeature {
        /// Description of the feature
        feature: String,
    },

    /// Static model configuration is inconsistent
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Reason for failure
        reason: String,
    },

    /// Raw input file not found
    #[error("Input file not found: {path}")]
    FileNotFound {
        /// Path that was attempted
        path: PathBuf,
    },

    /// Coprocessor rejected a request
    #[error("Coprocessor error: {source}")]
    Coprocessor {
        /// Underlying coprocessor error
        #[from]
        source: MxpError,
    },

    /// I/O error
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },
}

impl CnnError {
    /// Create an invalid configuration error
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create an unsupported feature error
    pub fn unsupported_feature(feature: impl Into<String>) -> Self {
        Self::UnsupportedFeature {
            feature: feature.into(),
        }
    }

    /// Create a geometry mismatch error
    pub fn geometry_mismatch(
        stage: impl Into<String>,
        expected: MapGeometry,
        actual: MapGeometry,
    ) -> Self {
        Self::GeometryMismatch {
            stage: stage.into(),
            expected,
            actual,
        }
    }
}

/// Outcome of one inference run, as reported at the process boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Run completed
    Success,
    /// A buffer could not be allocated
    AllocationFailure,
    /// Unsupported layer kind or feature
    UnsupportedFeature,
    /// Input geometry disagrees with the configuration
    GeometryMismatch,
    /// Any other fatal error
    Failed,
}

impl RunStatus {
    /// Status for the result of a run
    pub fn of<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(e) => Self::from(e),
        }
    }

    /// Process exit code for this status
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Failed => 1,
            Self::AllocationFailure => 2,
            Self::UnsupportedFeature => 3,
            Self::GeometryMismatch => 4,
        }
    }
}

impl From<&CnnError> for RunStatus {
    fn from(err: &CnnError) -> Self {
        match err {
            CnnError::AllocationFailed { .. } => Self::AllocationFailure,
            CnnError::UnsupportedLayer { .. } | CnnError::UnsupportedFeature { .. } => {
                Self::UnsupportedFeature
            }
            CnnError::GeometryMismatch { .. } => Self::GeometryMismatch,
            _ => Self::Failed,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::AllocationFailure => write!(f, "allocation failure"),
            Self::UnsupportedFeature => write!(f, "unsupported feature"),
            Self::GeometryMismatch => write!(f, "input geometry mismatch"),
            Self::Failed => write!(f, "failed"),
        }
    }
}
