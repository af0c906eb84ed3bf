use crate::errors::Result;
use crate::tensor::TensorDescriptor;

/// Execution seam between the pipelines and a compiled-model runtime.
///
/// A session is bound to one compiled model: it consumes one encoded
/// input tensor buffer and produces one raw output tensor buffer per
/// call. Slot metadata is fixed at construction.
pub trait InferenceSession: Send {
    /// Descriptor recorded for input slot 0.
    fn input_descriptor(&self) -> TensorDescriptor;

    /// Descriptor recorded for output slot 0.
    fn output_descriptor(&self) -> TensorDescriptor;

    /// Side length of the square RGB input (H = W).
    fn input_size(&self) -> u32;

    /// Element count of output slot 0, batch dimension excluded.
    fn output_count(&self) -> usize;

    /// Runs one synchronous inference call.
    ///
    /// `output` is cleared and filled with exactly
    /// `output_count() * output_descriptor().element_size()` bytes.
    fn run(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<()>;

    /// Releases runtime handles. Called at most once, by
    /// [`Engine::release`](crate::engine::Engine::release) or drop.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
