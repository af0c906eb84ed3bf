//! Pure transforms between real channel samples and quantized integers.
//!
//! Forward maps a normalized sample `x ∈ [0,1]` to `round(x / scale +
//! zero_point)`, clamped to the representable range of the target type.
//! Inverse maps a stored integer back to `(q - zero_point) * scale` with
//! no clamping. Float32 slots bypass both directions entirely.

use crate::tensor::TensorDescriptor;
use num_traits::{AsPrimitive, Bounded};

/// Quantizes one normalized channel sample for a quantized slot.
pub fn quantize<Q>(x: f32, descriptor: &TensorDescriptor) -> Q
where
    Q: Copy + Bounded + AsPrimitive<i64> + 'static,
    i64: AsPrimitive<Q>,
{
    let q = (f64::from(x) / descriptor.scale + f64::from(descriptor.zero_point)).round() as i64;
    q.clamp(Q::min_value().as_(), Q::max_value().as_()).as_()
}

/// Dequantizes one stored integer into a real value.
///
/// The result is a raw scaled logit or probability approximation; it is
/// intentionally not clamped.
pub fn dequantize<Q>(q: Q, descriptor: &TensorDescriptor) -> f32
where
    Q: Copy + AsPrimitive<i64> + 'static,
{
    (((q.as_() - i64::from(descriptor.zero_point)) as f64) * descriptor.scale) as f32
}
