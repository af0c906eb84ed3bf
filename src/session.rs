//! ONNX Runtime implementation of the inference session seam.

use crate::codec;
use crate::engine::{Backend, CompiledModel};
use crate::errors::{InferError, Result};
use crate::tensor::{TensorDescriptor, TensorType};
use crate::traits::InferenceSession;
use ort::execution_providers::{CUDAExecutionProvider, TensorRTExecutionProvider};
use ort::session::builder::SessionBuilder;
use ort::session::{Session, SessionInputValue};
use ort::tensor::TensorElementType;
use ort::value::Tensor;
use tracing::debug;

/// Model metadata keys carrying TFLite-style per-tensor quantization
/// parameters. Converters that quantize a graph write these; absent keys
/// leave the descriptor at identity (scale 1, zero point 0).
const INPUT_SCALE_KEY: &str = "input.scale";
const INPUT_ZERO_POINT_KEY: &str = "input.zero_point";
const OUTPUT_SCALE_KEY: &str = "output.scale";
const OUTPUT_ZERO_POINT_KEY: &str = "output.zero_point";

/// A committed ONNX Runtime session with slot-0 metadata resolved.
pub struct OrtSession {
    session: Option<Session>,
    input_name: String,
    output_name: String,
    input_descriptor: TensorDescriptor,
    output_descriptor: TensorDescriptor,
    input_size: u32,
    output_count: usize,
}

impl OrtSession {
    /// Commits the compiled model on the given backend and records the
    /// slot-0 tensor metadata.
    ///
    /// Any construction error is reported as a backend rejection so the
    /// engine builder can advance its fallback chain.
    pub fn with_backend(
        model: &CompiledModel,
        backend: Backend,
        device_id: i32,
        threads: usize,
    ) -> Result<Self> {
        let session = build_session(model, backend, device_id, threads)?;
        Self::from_ort(session)
    }

    fn from_ort(session: Session) -> Result<Self> {
        let input = session
            .inputs
            .first()
            .ok_or_else(|| model_error("input slot query", "model declares no inputs"))?;
        let input_name = input.name.clone();
        let input_type = element_type(&input.input_type)?;
        let input_shape = input
            .input_type
            .tensor_shape()
            .ok_or_else(|| model_error("input slot query", "input shape unavailable"))?;
        let input_size = square_rgb_side(&**input_shape)?;

        let output = session
            .outputs
            .first()
            .ok_or_else(|| model_error("output slot query", "model declares no outputs"))?;
        let output_name = output.name.clone();
        let output_type = element_type(&output.output_type)?;
        let output_shape = output
            .output_type
            .tensor_shape()
            .ok_or_else(|| model_error("output slot query", "output shape unavailable"))?;
        let output_count = element_count(&*output_shape)?;

        let (input_scale, input_zero) = quant_params(&session, INPUT_SCALE_KEY, INPUT_ZERO_POINT_KEY);
        let (output_scale, output_zero) =
            quant_params(&session, OUTPUT_SCALE_KEY, OUTPUT_ZERO_POINT_KEY);
        let input_descriptor = descriptor_for(input_type, input_scale, input_zero)?;
        let output_descriptor = descriptor_for(output_type, output_scale, output_zero)?;

        debug!(
            input = %input_name,
            output = %output_name,
            input_size,
            output_count,
            "ort session committed"
        );

        Ok(Self {
            session: Some(session),
            input_name,
            output_name,
            input_descriptor,
            output_descriptor,
            input_size,
            output_count,
        })
    }
}

impl InferenceSession for OrtSession {
    fn input_descriptor(&self) -> TensorDescriptor {
        self.input_descriptor
    }

    fn output_descriptor(&self) -> TensorDescriptor {
        self.output_descriptor
    }

    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn output_count(&self) -> usize {
        self.output_count
    }

    fn run(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<()> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| model_error("inference", "session already closed"))?;

        let expected = codec::encoded_len(self.input_size, &self.input_descriptor);
        if input.len() != expected {
            return Err(InferError::Validation {
                field: "input buffer".to_string(),
                reason: format!("expected {expected} bytes, got {}", input.len()),
            });
        }

        let side = i64::from(self.input_size);
        let shape = vec![1i64, side, side, codec::INPUT_CHANNELS as i64];
        let value: SessionInputValue = match self.input_descriptor.numeric_type {
            TensorType::Float32 => {
                let data: Vec<f32> = input
                    .chunks_exact(4)
                    .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
                    .collect();
                Tensor::from_array((shape, data))
                    .map_err(|e| wrap("input tensor creation", e))?
                    .into()
            }
            TensorType::Uint8 => Tensor::from_array((shape, input.to_vec()))
                .map_err(|e| wrap("input tensor creation", e))?
                .into(),
            TensorType::Int8 => {
                let data: Vec<i8> = input.iter().map(|&b| b as i8).collect();
                Tensor::from_array((shape, data))
                    .map_err(|e| wrap("input tensor creation", e))?
                    .into()
            }
        };

        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => value])
            .map_err(|e| wrap("inference run", e))?;
        let result = &outputs[self.output_name.as_str()];

        output.clear();
        match self.output_descriptor.numeric_type {
            TensorType::Float32 => {
                let array = result
                    .try_extract_array::<f32>()
                    .map_err(|e| wrap("output extraction", e))?;
                output.reserve(array.len() * 4);
                for v in array.iter() {
                    output.extend_from_slice(&v.to_ne_bytes());
                }
            }
            TensorType::Uint8 => {
                let array = result
                    .try_extract_array::<u8>()
                    .map_err(|e| wrap("output extraction", e))?;
                output.extend(array.iter().copied());
            }
            TensorType::Int8 => {
                let array = result
                    .try_extract_array::<i8>()
                    .map_err(|e| wrap("output extraction", e))?;
                output.extend(array.iter().map(|&v| v as u8));
            }
        }

        let expected_out = self.output_count * self.output_descriptor.element_size();
        if output.len() != expected_out {
            // A truncated buffer must never be read as a result.
            output.clear();
            return Err(model_error(
                "output extraction",
                "output length does not match the declared shape",
            ));
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(session) = self.session.take() {
            drop(session);
            debug!("ort session closed");
        }
        Ok(())
    }
}

fn build_session(
    model: &CompiledModel,
    backend: Backend,
    device_id: i32,
    threads: usize,
) -> Result<Session> {
    let reject = |operation: &str| {
        let operation = operation.to_string();
        move |e: ort::Error| InferError::BackendUnavailable {
            backend,
            operation,
            source: Box::new(e),
        }
    };

    let builder = SessionBuilder::new()
        .map_err(reject("session builder init"))?
        .with_intra_threads(threads)
        .map_err(reject("thread configuration"))?
        .with_memory_pattern(true)
        .map_err(reject("memory pattern configuration"))?;

    let builder = match backend {
        Backend::Accelerated => builder
            .with_execution_providers([TensorRTExecutionProvider::default()
                .with_device_id(device_id)
                .build()
                .error_on_failure()])
            .map_err(reject("execution provider registration"))?,
        Backend::Gpu => builder
            .with_execution_providers([CUDAExecutionProvider::default()
                .with_device_id(device_id)
                .build()
                .error_on_failure()])
            .map_err(reject("execution provider registration"))?,
        Backend::Cpu => builder,
    };

    builder
        .commit_from_memory(model.as_bytes())
        .map_err(reject("model commit"))
}

fn element_type(value_type: &ort::value::ValueType) -> Result<TensorType> {
    let ty = value_type
        .tensor_type()
        .ok_or_else(|| InferError::UnsupportedTensorType {
            actual: "non-tensor slot".to_string(),
        })?;
    match ty {
        TensorElementType::Float32 => Ok(TensorType::Float32),
        TensorElementType::Uint8 => Ok(TensorType::Uint8),
        TensorElementType::Int8 => Ok(TensorType::Int8),
        other => Err(InferError::UnsupportedTensorType {
            actual: format!("{other:?}"),
        }),
    }
}

/// Validates an NHWC `[N, S, S, 3]` input shape and returns `S`.
fn square_rgb_side<S: AsRef<[i64]>>(shape: &S) -> Result<u32> {
    let dims = shape.as_ref();
    if dims.len() != 4 || dims[3] != codec::INPUT_CHANNELS as i64 {
        return Err(model_error(
            "input shape validation",
            "expected an NHWC RGB input of rank 4",
        ));
    }
    if dims[1] < 1 || dims[1] != dims[2] {
        return Err(model_error(
            "input shape validation",
            "expected a fixed square spatial size",
        ));
    }
    Ok(dims[1] as u32)
}

/// Element count of a slot with the batch dimension excluded. Dynamic
/// dimensions past the batch are rejected; scratch buffers are sized from
/// this count once at construction.
fn element_count<S: AsRef<[i64]>>(shape: &S) -> Result<usize> {
    let dims = shape.as_ref();
    if dims.is_empty() {
        return Err(model_error("output shape validation", "scalar output"));
    }
    dims[1..].iter().try_fold(1usize, |acc, &d| {
        if d < 1 {
            Err(model_error(
                "output shape validation",
                "dynamic output dimensions are unsupported",
            ))
        } else {
            Ok(acc * d as usize)
        }
    })
}

/// Reads the raw quantization parameter strings from model metadata, if
/// the model carries any.
fn quant_params(
    session: &Session,
    scale_key: &str,
    zero_point_key: &str,
) -> (Option<String>, Option<String>) {
    match session.metadata() {
        Ok(metadata) => (
            metadata.custom(scale_key).ok().flatten(),
            metadata.custom(zero_point_key).ok().flatten(),
        ),
        Err(_) => (None, None),
    }
}

fn descriptor_for(
    numeric_type: TensorType,
    scale_raw: Option<String>,
    zero_point_raw: Option<String>,
) -> Result<TensorDescriptor> {
    if !numeric_type.is_quantized() {
        return Ok(TensorDescriptor::float32());
    }

    let scale = match scale_raw {
        Some(raw) => raw.parse::<f64>().map_err(|_| InferError::Validation {
            field: "quantization scale".to_string(),
            reason: format!("not a number: {raw}"),
        })?,
        None => 1.0,
    };
    let zero_point = match zero_point_raw {
        Some(raw) => raw.parse::<i32>().map_err(|_| InferError::Validation {
            field: "quantization zero point".to_string(),
            reason: format!("not an integer: {raw}"),
        })?,
        None => 0,
    };
    TensorDescriptor::quantized(numeric_type, scale, zero_point)
}

fn model_error(operation: &str, message: &str) -> InferError {
    InferError::Model {
        operation: operation.to_string(),
        source: Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            message.to_string(),
        )),
    }
}

fn wrap(operation: &str, err: ort::Error) -> InferError {
    InferError::Model {
        operation: operation.to_string(),
        source: Box::new(err),
    }
}
