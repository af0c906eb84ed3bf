use crate::errors::{InferError, Result};
use std::fmt;

/// Numeric element type of a tensor slot.
///
/// The library recognizes exactly these three types; a model declaring
/// anything else is rejected with [`InferError::UnsupportedTensorType`]
/// during engine construction, so downstream encode/decode matches stay
/// exhaustive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TensorType {
    Float32,
    Uint8,
    Int8,
}

impl TensorType {
    /// Size in bytes of one element.
    pub const fn element_size(self) -> usize {
        match self {
            Self::Float32 => 4,
            Self::Uint8 | Self::Int8 => 1,
        }
    }

    pub const fn is_quantized(self) -> bool {
        matches!(self, Self::Uint8 | Self::Int8)
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Float32 => "float32",
            Self::Uint8 => "uint8",
            Self::Int8 => "int8",
        };
        f.write_str(name)
    }
}

/// Metadata describing exactly one tensor slot (input or output).
///
/// `scale` and `zero_point` drive the quantization policy for integer
/// slots; for [`TensorType::Float32`] they are identity (1.0 and 0) and
/// ignored. Invariant: `scale > 0` whenever the type is quantized.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TensorDescriptor {
    pub numeric_type: TensorType,
    pub scale: f64,
    pub zero_point: i32,
}

impl TensorDescriptor {
    /// Descriptor for a float32 slot. Scale and zero point are identity.
    pub const fn float32() -> Self {
        Self {
            numeric_type: TensorType::Float32,
            scale: 1.0,
            zero_point: 0,
        }
    }

    /// Descriptor for a quantized integer slot.
    pub fn quantized(numeric_type: TensorType, scale: f64, zero_point: i32) -> Result<Self> {
        if !numeric_type.is_quantized() {
            return Err(InferError::Validation {
                field: "numeric_type".to_string(),
                reason: format!("{numeric_type} is not a quantized type"),
            });
        }
        if !(scale > 0.0) || !scale.is_finite() {
            return Err(InferError::Validation {
                field: "scale".to_string(),
                reason: format!("must be positive and finite, got {scale}"),
            });
        }
        Ok(Self {
            numeric_type,
            scale,
            zero_point,
        })
    }

    pub const fn element_size(&self) -> usize {
        self.numeric_type.element_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_sizes() {
        assert_eq!(TensorType::Float32.element_size(), 4);
        assert_eq!(TensorType::Uint8.element_size(), 1);
        assert_eq!(TensorType::Int8.element_size(), 1);
    }

    #[test]
    fn test_float32_descriptor_is_identity() {
        let desc = TensorDescriptor::float32();
        assert_eq!(desc.numeric_type, TensorType::Float32);
        assert_eq!(desc.scale, 1.0);
        assert_eq!(desc.zero_point, 0);
    }

    #[test]
    fn test_quantized_descriptor_requires_positive_scale() {
        assert!(TensorDescriptor::quantized(TensorType::Uint8, 0.0, 0).is_err());
        assert!(TensorDescriptor::quantized(TensorType::Uint8, -1.0, 0).is_err());
        assert!(TensorDescriptor::quantized(TensorType::Uint8, f64::NAN, 0).is_err());
        assert!(TensorDescriptor::quantized(TensorType::Int8, 1.0 / 255.0, -128).is_ok());
    }

    #[test]
    fn test_quantized_descriptor_rejects_float32() {
        assert!(TensorDescriptor::quantized(TensorType::Float32, 1.0, 0).is_err());
    }
}
