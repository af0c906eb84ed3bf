use crate::engine::Backend;
use thiserror::Error;

/// Structured error types for the inference library.
///
/// Each variant captures context specific to its error domain (backend
/// selection, engine execution, tensor metadata, caller input), so callers
/// can react to the failure class without parsing error strings.
#[derive(Error, Debug)]
pub enum InferError {
    /// A single backend refused to construct a session.
    ///
    /// Produced during engine construction and consumed by the fallback
    /// chain, which advances to the next backend. It only reaches callers
    /// wrapped inside [`InferError::EngineConstruction`] when every backend
    /// has been rejected.
    #[error("backend {backend} unavailable: {operation} failed")]
    BackendUnavailable {
        backend: Backend,
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// No backend accepted the compiled model, including the CPU terminal
    /// fallback. The source is the final rejection, which implies a
    /// malformed or incompatible model.
    #[error("engine construction failed: no backend accepted the model")]
    EngineConstruction {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The compiled model declares a tensor slot whose numeric type has no
    /// encode/decode policy. Fatal, never retried.
    #[error("unsupported tensor type: {actual}")]
    UnsupportedTensorType { actual: String },

    /// An execution-time engine failure.
    #[error("model error: {operation} failed")]
    Model {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("validation error: {field} {reason}")]
    Validation { field: String, reason: String },
}

pub type Result<T> = std::result::Result<T, InferError>;

/// Convert ONNX Runtime errors to model errors.
///
/// Code that has context should construct [`InferError::Model`] directly
/// with the specific operation name.
impl From<ort::Error> for InferError {
    fn from(err: ort::Error) -> Self {
        Self::Model {
            operation: "ort operation".to_string(),
            source: Box::new(err),
        }
    }
}

/// Convert image crate errors to validation errors.
impl From<image::ImageError> for InferError {
    fn from(err: image::ImageError) -> Self {
        Self::Validation {
            field: "image".to_string(),
            reason: err.to_string(),
        }
    }
}

/// Convert ndarray shape errors to model errors.
///
/// Shape errors occur while shuttling tensors in and out of the engine,
/// so they are categorized as model errors rather than a separate type.
impl From<ndarray::ShapeError> for InferError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::Model {
            operation: "tensor shape conversion".to_string(),
            source: Box::new(err),
        }
    }
}
