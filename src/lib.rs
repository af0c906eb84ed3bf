pub mod classifier;
pub mod codec;
pub mod engine;
pub mod errors;
pub mod quantize;
pub mod segmenter;
pub mod session;
pub mod tensor;
pub mod traits;

pub mod mocks;

pub use classifier::Classifier;
pub use engine::{Backend, CompiledModel, Engine, EngineBuilder, MAX_INFERENCE_THREADS};
pub use errors::{InferError, Result};
pub use segmenter::{Segmenter, DEFAULT_THRESHOLD};
pub use session::OrtSession;
pub use tensor::{TensorDescriptor, TensorType};
pub use traits::InferenceSession;
