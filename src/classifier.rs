use crate::codec;
use crate::engine::Engine;
use crate::errors::{InferError, Result};
use image::DynamicImage;
use tracing::debug;

/// End-to-end image → class-probability pipeline.
///
/// Owns its engine together with reusable input/output tensor buffers
/// sized once from the model's recorded shapes. Calls take `&mut self`;
/// use one classifier per logical session.
pub struct Classifier {
    engine: Engine,
    num_classes: usize,
    input_buf: Vec<u8>,
    output_buf: Vec<u8>,
}

impl Classifier {
    pub fn new(engine: Engine) -> Result<Self> {
        let num_classes = engine.output_count();
        if num_classes == 0 {
            return Err(InferError::Validation {
                field: "output shape".to_string(),
                reason: "model declares no classes".to_string(),
            });
        }
        let input_capacity = codec::encoded_len(engine.input_size(), &engine.input_descriptor());
        let output_capacity = num_classes * engine.output_descriptor().element_size();
        Ok(Self {
            engine,
            num_classes,
            input_buf: Vec::with_capacity(input_capacity),
            output_buf: Vec::with_capacity(output_capacity),
        })
    }

    pub const fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub const fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Classifies an image into per-class probabilities, index-aligned
    /// with the model's class ordering. Quantized model outputs are
    /// dequantized before being returned.
    pub fn classify(&mut self, image: &DynamicImage) -> Result<Vec<f32>> {
        let rgb = image.to_rgb8();
        let input_descriptor = self.engine.input_descriptor();
        codec::encode_image_into(
            &rgb,
            self.engine.input_size(),
            &input_descriptor,
            &mut self.input_buf,
        )?;
        self.engine.run(&self.input_buf, &mut self.output_buf)?;

        let output_descriptor = self.engine.output_descriptor();
        let probs =
            codec::decode_class_probs(&self.output_buf, self.num_classes, &output_descriptor)?;
        debug!(classes = probs.len(), backend = %self.engine.backend(), "classification completed");
        Ok(probs)
    }

    /// Releases the engine and its accelerator handles.
    pub fn release(self) -> Result<()> {
        self.engine.release()
    }
}
