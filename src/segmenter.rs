use crate::codec;
use crate::engine::Engine;
use crate::errors::{InferError, Result};
use image::{imageops, imageops::FilterType, DynamicImage, Rgba, RgbaImage};
use tracing::debug;

/// Default probability threshold separating foreground from background.
pub const DEFAULT_THRESHOLD: f32 = 0.5;

/// Foreground visualization tint (semi-transparent red). The
/// foreground/background decision per pixel is the contract; the tint is
/// presentation and may be varied.
pub const FOREGROUND_TINT: Rgba<u8> = Rgba([255, 0, 0, 160]);

const BACKGROUND: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// End-to-end image → foreground mask → overlay pipeline.
///
/// Owns its engine and reusable tensor buffers; one segmenter per
/// logical session. The bound model must produce one logit per input
/// pixel (single-channel map).
pub struct Segmenter {
    engine: Engine,
    input_buf: Vec<u8>,
    output_buf: Vec<u8>,
}

impl Segmenter {
    pub fn new(engine: Engine) -> Result<Self> {
        let side = engine.input_size() as usize;
        if engine.output_count() != side * side {
            return Err(InferError::Validation {
                field: "output shape".to_string(),
                reason: format!(
                    "expected one logit per input pixel ({} for a {side}x{side} input), model declares {}",
                    side * side,
                    engine.output_count()
                ),
            });
        }
        let input_capacity = codec::encoded_len(engine.input_size(), &engine.input_descriptor());
        let output_capacity = engine.output_count() * engine.output_descriptor().element_size();
        Ok(Self {
            engine,
            input_buf: Vec::with_capacity(input_capacity),
            output_buf: Vec::with_capacity(output_capacity),
        })
    }

    pub const fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Predicts the model-input-sized foreground mask for an image.
    ///
    /// Each output logit goes through the stable sigmoid; pixels with
    /// probability at or above `threshold` become foreground, everything
    /// else fully transparent background.
    pub fn predict_mask(&mut self, image: &DynamicImage, threshold: f32) -> Result<RgbaImage> {
        validate_threshold(threshold)?;

        let rgb = image.to_rgb8();
        let size = self.engine.input_size();
        let input_descriptor = self.engine.input_descriptor();
        codec::encode_image_into(&rgb, size, &input_descriptor, &mut self.input_buf)?;
        self.engine.run(&self.input_buf, &mut self.output_buf)?;

        let output_descriptor = self.engine.output_descriptor();
        let logits = codec::decode_elements(
            &self.output_buf,
            (size as usize) * (size as usize),
            &output_descriptor,
        )?;
        debug!(size, threshold, backend = %self.engine.backend(), "segmentation mask predicted");
        Ok(threshold_mask(&logits, size, threshold))
    }

    /// Predicts the mask, upscales it to the image's dimensions and
    /// alpha-composites it over the fully opaque original.
    pub fn overlay(&mut self, image: &DynamicImage, threshold: f32) -> Result<DynamicImage> {
        let mask = self.predict_mask(image, threshold)?;

        // Degenerate originals still need a valid resample target.
        let width = image.width().max(1);
        let height = image.height().max(1);
        let mask = imageops::resize(&mask, width, height, FilterType::Triangle);

        let mut composed = image.to_rgba8();
        imageops::overlay(&mut composed, &mask, 0, 0);
        Ok(DynamicImage::ImageRgba8(composed))
    }

    /// Releases the engine and its accelerator handles.
    pub fn release(self) -> Result<()> {
        self.engine.release()
    }
}

/// Numerically stable logistic function.
///
/// Splitting on the sign keeps the `exp` argument non-positive, so large
/// magnitude logits cannot overflow; the result is clamped to `[0,1]`
/// against floating rounding.
pub fn sigmoid_stable(z: f32) -> f32 {
    let p = if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    };
    p.clamp(0.0, 1.0)
}

fn validate_threshold(threshold: f32) -> Result<()> {
    if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
        return Err(InferError::Validation {
            field: "threshold".to_string(),
            reason: format!("must be within [0,1], got {threshold}"),
        });
    }
    Ok(())
}

fn threshold_mask(logits: &[f32], size: u32, threshold: f32) -> RgbaImage {
    let mut mask = RgbaImage::new(size, size);
    for (&logit, pixel) in logits.iter().zip(mask.pixels_mut()) {
        let p = sigmoid_stable(logit);
        *pixel = if p >= threshold {
            FOREGROUND_TINT
        } else {
            BACKGROUND
        };
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Backend, Engine};
    use crate::mocks::MockSession;
    use image::{Rgb, RgbImage};

    fn engine_with_logits(size: u32, logits: &[f32]) -> Engine {
        Engine::from_session(
            Backend::Cpu,
            Box::new(MockSession::segmentation_map(size, logits)),
        )
    }

    fn foreground_count(mask: &RgbaImage) -> usize {
        mask.pixels().filter(|p| p.0[3] != 0).count()
    }

    #[test]
    fn test_sigmoid_is_stable_at_extremes() {
        for z in [-1000.0f32, -1.0, 0.0, 1.0, 1000.0] {
            let p = sigmoid_stable(z);
            assert!(p.is_finite(), "z={z}");
            assert!((0.0..=1.0).contains(&p), "z={z} p={p}");
        }
        assert_eq!(sigmoid_stable(0.0), 0.5);
        assert_eq!(sigmoid_stable(1000.0), 1.0);
        assert_eq!(sigmoid_stable(-1000.0), 0.0);
    }

    #[test]
    fn test_sigmoid_matches_naive_formula_for_moderate_inputs() {
        for i in -20..=20 {
            let z = i as f32;
            let naive = 1.0 / (1.0 + (-z).exp());
            assert!((sigmoid_stable(z) - naive).abs() < 1e-6, "z={z}");
        }
    }

    #[test]
    fn test_threshold_mask_pixels() {
        // Logits 2.0 and -2.0: sigmoid ≈ 0.88 and 0.12.
        let mask = threshold_mask(&[2.0, -2.0, 2.0, -2.0], 2, 0.5);
        assert_eq!(*mask.get_pixel(0, 0), FOREGROUND_TINT);
        assert_eq!(*mask.get_pixel(1, 0), BACKGROUND);
        assert_eq!(foreground_count(&mask), 2);
    }

    #[test]
    fn test_raising_threshold_never_grows_foreground() {
        let logits: Vec<f32> = (0..64).map(|i| (i as f32 - 32.0) / 8.0).collect();
        let mut previous = usize::MAX;
        for step in 1..=9 {
            let threshold = step as f32 / 10.0;
            let mask = threshold_mask(&logits, 8, threshold);
            let count = foreground_count(&mask);
            assert!(count <= previous, "threshold={threshold}");
            previous = count;
        }
    }

    #[test]
    fn test_overlay_keeps_original_dimensions() -> Result<()> {
        let engine = engine_with_logits(4, &[10.0; 16]);
        let mut segmenter = Segmenter::new(engine)?;
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(23, 17, Rgb([0, 255, 0])));

        let overlay = segmenter.overlay(&image, DEFAULT_THRESHOLD)?;
        assert_eq!(overlay.width(), 23);
        assert_eq!(overlay.height(), 17);
        Ok(())
    }

    #[test]
    fn test_overlay_tints_foreground_over_source() -> Result<()> {
        // All logits strongly positive: every pixel is foreground.
        let engine = engine_with_logits(4, &[10.0; 16]);
        let mut segmenter = Segmenter::new(engine)?;
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([0, 0, 255])));

        let overlay = segmenter.overlay(&image, DEFAULT_THRESHOLD)?.to_rgba8();
        let pixel = overlay.get_pixel(4, 4);
        // Red tint blended over opaque blue: red dominates, blue remains.
        assert!(pixel.0[0] > 100);
        assert!(pixel.0[2] < 255);
        assert_eq!(pixel.0[3], 255);
        Ok(())
    }

    #[test]
    fn test_all_background_leaves_source_untouched() -> Result<()> {
        let engine = engine_with_logits(4, &[-10.0; 16]);
        let mut segmenter = Segmenter::new(engine)?;
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(6, 6, Rgb([10, 20, 30])));

        let overlay = segmenter.overlay(&image, DEFAULT_THRESHOLD)?.to_rgba8();
        assert!(overlay
            .pixels()
            .all(|p| p.0 == [10, 20, 30, 255]));
        Ok(())
    }

    #[test]
    fn test_threshold_outside_unit_interval_is_rejected() -> Result<()> {
        let engine = engine_with_logits(2, &[0.0; 4]);
        let mut segmenter = Segmenter::new(engine)?;
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(2, 2, Rgb([0, 0, 0])));

        for bad in [-0.1f32, 1.1, f32::NAN] {
            let err = segmenter.predict_mask(&image, bad).unwrap_err();
            assert!(matches!(err, InferError::Validation { .. }));
        }
        Ok(())
    }

    #[test]
    fn test_segmenter_rejects_mismatched_output_shape() {
        // 3 logits for a 2x2 input cannot be a per-pixel map.
        let engine = engine_with_logits(2, &[0.0; 3]);
        let err = Segmenter::new(engine).unwrap_err();
        assert!(matches!(err, InferError::Validation { .. }));
    }
}
