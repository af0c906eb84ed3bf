//! Engine construction with a prioritized hardware-backend fallback chain.

use crate::errors::{InferError, Result};
use crate::session::OrtSession;
use crate::tensor::TensorDescriptor;
use crate::traits::InferenceSession;
use parking_lot::Mutex;
use std::fmt;
use tracing::{info, warn};

/// Hardware execution strategy for running a compiled model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Dedicated ML accelerator (TensorRT execution provider).
    Accelerated,
    /// General-purpose GPU (CUDA execution provider).
    Gpu,
    /// Plain CPU execution; the terminal fallback.
    Cpu,
}

impl Backend {
    /// Fixed preference order tried during engine construction.
    pub const PRIORITY: [Self; 3] = [Self::Accelerated, Self::Gpu, Self::Cpu];
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Accelerated => "accelerated",
            Self::Gpu => "gpu",
            Self::Cpu => "cpu",
        };
        f.write_str(name)
    }
}

/// Opaque serialized network graph.
///
/// The caller owns the buffer for the lifetime of any engine built from
/// it; the builder only reads it during construction.
#[derive(Debug, Clone)]
pub struct CompiledModel {
    bytes: Vec<u8>,
}

impl CompiledModel {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl From<Vec<u8>> for CompiledModel {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from_bytes(bytes)
    }
}

/// Upper bound on engine worker threads regardless of core count.
pub const MAX_INFERENCE_THREADS: usize = 4;

/// Worker thread count for graph execution:
/// `min(available_parallelism, MAX_INFERENCE_THREADS)`.
pub(crate) fn inference_thread_count() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
        .min(MAX_INFERENCE_THREADS)
}

/// Builds an [`Engine`] by attempting backends in priority order.
///
/// Each backend attempt that fails is rejected silently (logged, never
/// surfaced) and the next backend is tried; attempts are strictly
/// sequential. Only when every backend has been rejected does
/// [`InferError::EngineConstruction`] reach the caller.
#[derive(Debug, Clone)]
pub struct EngineBuilder {
    backends: Vec<Backend>,
    device_id: i32,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            backends: Backend::PRIORITY.to_vec(),
            device_id: 0,
        }
    }

    /// Device ordinal passed to accelerator execution providers.
    pub fn with_device_id(mut self, device_id: i32) -> Self {
        self.device_id = device_id;
        self
    }

    /// Overrides the backend attempt order.
    pub fn with_backends(mut self, backends: impl Into<Vec<Backend>>) -> Self {
        self.backends = backends.into();
        self
    }

    pub fn build(&self, model: &CompiledModel) -> Result<Engine> {
        let threads = inference_thread_count();
        let (backend, session) = first_available(&self.backends, |backend| {
            OrtSession::with_backend(model, backend, self.device_id, threads)
        })?;
        info!(%backend, "selected inference backend");
        Ok(Engine::from_session(backend, Box::new(session)))
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Folds over backend constructors, taking the first success.
///
/// A constructor error is a rejection, not a failure: it advances to the
/// next backend. The last rejection is kept as the construction error
/// source when no backend succeeds.
pub(crate) fn first_available<S>(
    backends: &[Backend],
    mut attempt: impl FnMut(Backend) -> Result<S>,
) -> Result<(Backend, S)> {
    let mut last_error = None;
    for &backend in backends {
        match attempt(backend) {
            Ok(session) => return Ok((backend, session)),
            Err(err) => {
                warn!(%backend, error = %err, "backend rejected, trying next");
                last_error = Some(err);
            }
        }
    }
    match last_error {
        Some(err) => Err(InferError::EngineConstruction {
            source: Box::new(err),
        }),
        None => Err(InferError::Validation {
            field: "backends".to_string(),
            reason: "backend list is empty".to_string(),
        }),
    }
}

/// A constructed, runnable inference session bound to one compiled model
/// and one selected backend.
///
/// Slot-0 descriptors and shapes are recorded at construction; pipelines
/// read them from here instead of re-deriving them per call. Calls on one
/// engine serialize on an internal mutex; use one engine per logical
/// session for concurrency.
pub struct Engine {
    backend: Backend,
    input_descriptor: TensorDescriptor,
    output_descriptor: TensorDescriptor,
    input_size: u32,
    output_count: usize,
    session: Mutex<Box<dyn InferenceSession>>,
    released: bool,
}

impl Engine {
    /// Wraps an already-constructed session. Used by the builder and by
    /// tests substituting mock sessions.
    pub fn from_session(backend: Backend, session: Box<dyn InferenceSession>) -> Self {
        let input_descriptor = session.input_descriptor();
        let output_descriptor = session.output_descriptor();
        let input_size = session.input_size();
        let output_count = session.output_count();
        Self {
            backend,
            input_descriptor,
            output_descriptor,
            input_size,
            output_count,
            session: Mutex::new(session),
            released: false,
        }
    }

    pub const fn backend(&self) -> Backend {
        self.backend
    }

    pub const fn input_descriptor(&self) -> TensorDescriptor {
        self.input_descriptor
    }

    pub const fn output_descriptor(&self) -> TensorDescriptor {
        self.output_descriptor
    }

    /// Side length of the model's square RGB input.
    pub const fn input_size(&self) -> u32 {
        self.input_size
    }

    /// Element count of output slot 0, batch dimension excluded.
    pub const fn output_count(&self) -> usize {
        self.output_count
    }

    /// Runs one synchronous inference call.
    pub fn run(&self, input: &[u8], output: &mut Vec<u8>) -> Result<()> {
        self.session.lock().run(input, output)
    }

    /// Releases the session and all accelerator handles it owns, together.
    ///
    /// Must be called before the compiled model is discarded or replaced.
    /// Dropping an unreleased engine closes best-effort and logs failures.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.session.get_mut().close()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = self.session.get_mut().close() {
            warn!(backend = %self.backend, error = %err, "engine close failed during drop");
        }
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("backend", &self.backend)
            .field("input_size", &self.input_size)
            .field("output_count", &self.output_count)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockSession;

    fn rejection(backend: Backend) -> InferError {
        InferError::BackendUnavailable {
            backend,
            operation: "session construction".to_string(),
            source: Box::new(std::io::Error::other("driver missing")),
        }
    }

    #[test]
    fn test_first_available_prefers_earlier_backend() {
        let (backend, value) =
            first_available(&Backend::PRIORITY, |backend| match backend {
                Backend::Accelerated => Err(rejection(backend)),
                other => Ok(other),
            })
            .unwrap();
        assert_eq!(backend, Backend::Gpu);
        assert_eq!(value, Backend::Gpu);
    }

    #[test]
    fn test_first_available_falls_back_to_cpu() {
        // A model only the CPU backend can construct must end up on the
        // CPU backend without raising, after trying each accelerator once
        // in priority order.
        let mut attempts = Vec::new();
        let result = first_available(&Backend::PRIORITY, |backend| {
            attempts.push(backend);
            if backend == Backend::Cpu {
                Ok(backend)
            } else {
                Err(rejection(backend))
            }
        });
        let (backend, _) = result.unwrap();
        assert_eq!(backend, Backend::Cpu);
        assert_eq!(
            attempts,
            vec![Backend::Accelerated, Backend::Gpu, Backend::Cpu]
        );
    }

    #[test]
    fn test_first_available_surfaces_total_failure() {
        let err = first_available::<()>(&Backend::PRIORITY, |backend| Err(rejection(backend)))
            .unwrap_err();
        assert!(matches!(err, InferError::EngineConstruction { .. }));
    }

    #[test]
    fn test_first_available_rejects_empty_list() {
        let err = first_available(&[], |_backend| Ok(())).unwrap_err();
        assert!(matches!(err, InferError::Validation { .. }));
    }

    #[test]
    fn test_thread_count_is_capped() {
        assert!(inference_thread_count() >= 1);
        assert!(inference_thread_count() <= MAX_INFERENCE_THREADS);
    }

    #[test]
    fn test_engine_records_session_metadata() {
        let session = MockSession::segmentation(4, 0.0);
        let engine = Engine::from_session(Backend::Cpu, Box::new(session));
        assert_eq!(engine.backend(), Backend::Cpu);
        assert_eq!(engine.input_size(), 4);
        assert_eq!(engine.output_count(), 16);
        assert_eq!(
            engine.input_descriptor(),
            crate::tensor::TensorDescriptor::float32()
        );
    }

    #[test]
    fn test_engine_release_closes_once() {
        let session = MockSession::segmentation(2, 0.0);
        let engine = Engine::from_session(Backend::Cpu, Box::new(session));
        engine.release().unwrap();
    }
}
