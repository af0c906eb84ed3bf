//! Conversion between decoded RGB images and raw tensor buffers.
//!
//! Input encoding resamples to the model's square input size and writes
//! samples row-major, channel-minor (NHWC). Output decoding turns raw
//! bytes back into `f32` values per the slot descriptor. Multi-byte
//! elements use the platform's native byte order; buffers never cross a
//! process boundary, so only agreement with the engine matters.

use crate::errors::{InferError, Result};
use crate::quantize::{dequantize, quantize};
use crate::tensor::{TensorDescriptor, TensorType};
use image::{imageops, imageops::FilterType, RgbImage};

/// Channels per input pixel. Models with other input layouts are rejected
/// at engine construction.
pub const INPUT_CHANNELS: usize = 3;

/// Encodes an image into a freshly allocated input tensor buffer.
pub fn encode_image(
    image: &RgbImage,
    target_size: u32,
    descriptor: &TensorDescriptor,
) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    encode_image_into(image, target_size, descriptor, &mut buf)?;
    Ok(buf)
}

/// Encodes an image into `buf`, reusing its allocation across calls.
///
/// The source image is resampled (bilinear) to `target_size × target_size`
/// without being mutated, each 8-bit channel is normalized to `[0,1]`, and
/// the sample is written per the descriptor's numeric type: four
/// native-order bytes for float32, one quantized byte for uint8/int8.
/// On success `buf` holds exactly
/// `target_size² * INPUT_CHANNELS * element_size` bytes.
pub fn encode_image_into(
    image: &RgbImage,
    target_size: u32,
    descriptor: &TensorDescriptor,
    buf: &mut Vec<u8>,
) -> Result<()> {
    if target_size == 0 {
        return Err(InferError::Validation {
            field: "target_size".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }
    if descriptor.numeric_type.is_quantized() && !(descriptor.scale > 0.0) {
        return Err(InferError::Validation {
            field: "descriptor.scale".to_string(),
            reason: format!("must be positive for {}", descriptor.numeric_type),
        });
    }

    let resized = imageops::resize(image, target_size, target_size, FilterType::Triangle);
    let expected = encoded_len(target_size, descriptor);

    buf.clear();
    buf.reserve(expected);
    match descriptor.numeric_type {
        TensorType::Float32 => {
            for pixel in resized.pixels() {
                for &channel in &pixel.0 {
                    let sample = f32::from(channel) / 255.0;
                    buf.extend_from_slice(&sample.to_ne_bytes());
                }
            }
        }
        TensorType::Uint8 => {
            for pixel in resized.pixels() {
                for &channel in &pixel.0 {
                    let sample = f32::from(channel) / 255.0;
                    buf.push(quantize::<u8>(sample, descriptor));
                }
            }
        }
        TensorType::Int8 => {
            for pixel in resized.pixels() {
                for &channel in &pixel.0 {
                    let sample = f32::from(channel) / 255.0;
                    buf.push(quantize::<i8>(sample, descriptor) as u8);
                }
            }
        }
    }
    debug_assert_eq!(buf.len(), expected);
    Ok(())
}

/// Byte length of an encoded input buffer for the given size/descriptor.
pub const fn encoded_len(target_size: u32, descriptor: &TensorDescriptor) -> usize {
    (target_size as usize) * (target_size as usize) * INPUT_CHANNELS * descriptor.element_size()
}

/// Decodes a classification output buffer into per-class probabilities.
///
/// Quantized outputs are always dequantized so the result is uniformly
/// `f32`, index-aligned with the model's class ordering.
pub fn decode_class_probs(
    output: &[u8],
    num_classes: usize,
    descriptor: &TensorDescriptor,
) -> Result<Vec<f32>> {
    decode_elements(output, num_classes, descriptor)
}

/// Decodes `count` raw output elements into `f32` values.
///
/// Float32 elements are read as-is; uint8/int8 elements go through the
/// inverse quantization transform.
pub fn decode_elements(
    bytes: &[u8],
    count: usize,
    descriptor: &TensorDescriptor,
) -> Result<Vec<f32>> {
    let expected = count * descriptor.element_size();
    if bytes.len() != expected {
        return Err(InferError::Validation {
            field: "output buffer".to_string(),
            reason: format!("expected {expected} bytes, got {}", bytes.len()),
        });
    }

    let values = match descriptor.numeric_type {
        TensorType::Float32 => bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
        TensorType::Uint8 => bytes.iter().map(|&q| dequantize(q, descriptor)).collect(),
        TensorType::Int8 => bytes
            .iter()
            .map(|&q| dequantize(q as i8, descriptor))
            .collect(),
    };
    Ok(values)
}
