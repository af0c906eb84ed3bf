//! Scriptable sessions for tests; no runtime or hardware involved.

use crate::codec;
use crate::errors::{InferError, Result};
use crate::tensor::TensorDescriptor;
use crate::traits::InferenceSession;

/// In-memory mock of the inference session seam.
///
/// Returns the same canned output bytes on every call and validates the
/// input buffer length like a real session would.
#[derive(Debug, Clone)]
pub struct MockSession {
    input_descriptor: TensorDescriptor,
    output_descriptor: TensorDescriptor,
    input_size: u32,
    canned_output: Vec<u8>,
    fail_run: bool,
}

impl MockSession {
    pub fn new(
        input_size: u32,
        input_descriptor: TensorDescriptor,
        output_descriptor: TensorDescriptor,
        canned_output: Vec<u8>,
    ) -> Self {
        Self {
            input_descriptor,
            output_descriptor,
            input_size,
            canned_output,
            fail_run: false,
        }
    }

    /// Float32 segmentation session producing a constant logit map.
    pub fn segmentation(input_size: u32, logit: f32) -> Self {
        let logits = vec![logit; (input_size * input_size) as usize];
        Self::segmentation_map(input_size, &logits)
    }

    /// Float32 segmentation session producing the given logit map.
    pub fn segmentation_map(input_size: u32, logits: &[f32]) -> Self {
        let mut canned = Vec::with_capacity(logits.len() * 4);
        for logit in logits {
            canned.extend_from_slice(&logit.to_ne_bytes());
        }
        Self::new(
            input_size,
            TensorDescriptor::float32(),
            TensorDescriptor::float32(),
            canned,
        )
    }

    /// Classification session returning fixed raw output bytes.
    pub fn classification(
        input_size: u32,
        input_descriptor: TensorDescriptor,
        output_descriptor: TensorDescriptor,
        output_bytes: Vec<u8>,
    ) -> Self {
        Self::new(input_size, input_descriptor, output_descriptor, output_bytes)
    }

    /// Makes every `run` call fail with a model error.
    pub fn failing(mut self) -> Self {
        self.fail_run = true;
        self
    }
}

impl InferenceSession for MockSession {
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
        self.canned_output.len() / self.output_descriptor.element_size()
    }

    fn run(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<()> {
        let expected = codec::encoded_len(self.input_size, &self.input_descriptor);
        if input.len() != expected {
            return Err(InferError::Validation {
                field: "input buffer".to_string(),
                reason: format!("expected {expected} bytes, got {}", input.len()),
            });
        }
        if self.fail_run {
            return Err(InferError::Model {
                operation: "mock inference".to_string(),
                source: Box::new(std::io::Error::other("scripted failure")),
            });
        }
        output.clear();
        output.extend_from_slice(&self.canned_output);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::TensorType;

    #[test]
    fn test_mock_session_shapes() {
        let mock = MockSession::segmentation(8, 0.0);
        assert_eq!(mock.input_size(), 8);
        assert_eq!(mock.output_count(), 64);
        assert_eq!(mock.input_descriptor(), TensorDescriptor::float32());
    }

    #[test]
    fn test_mock_session_run_returns_canned_bytes() -> Result<()> {
        let desc = TensorDescriptor::quantized(TensorType::Uint8, 1.0 / 255.0, 0)?;
        let mut mock = MockSession::classification(
            2,
            TensorDescriptor::float32(),
            desc,
            vec![255, 0, 128],
        );
        let input = vec![0u8; codec::encoded_len(2, &TensorDescriptor::float32())];
        let mut output = Vec::new();
        mock.run(&input, &mut output)?;
        assert_eq!(output, vec![255, 0, 128]);
        Ok(())
    }

    #[test]
    fn test_mock_session_validates_input_length() {
        let mut mock = MockSession::segmentation(4, 0.0);
        let mut output = Vec::new();
        let err = mock.run(&[0u8; 3], &mut output).unwrap_err();
        assert!(matches!(err, InferError::Validation { .. }));
    }
}
