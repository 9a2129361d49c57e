//! Batch assembly: images decoded to normalized RGB tensors paired with prompts and captions.

use crate::dataset::CaptionExample;
use crate::error::{TrainingError, TrainingResult};
use image::imageops::FilterType;

/// SigLIP-style normalization: `(x / 255 - 0.5) / 0.5`, giving values in `[-1, 1]`.
const IMAGE_MEAN: f32 = 0.5;
const IMAGE_STD: f32 = 0.5;

/// A collated batch in channel-first layout (`[batch, 3, size, size]`, row-major).
#[derive(Debug, Clone)]
pub struct CaptionBatch {
    pub prefixes: Vec<String>,
    pub suffixes: Vec<String>,
    pub pixel_values: Vec<f32>,
    pub image_size: u32,
}

impl CaptionBatch {
    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    pub fn shape(&self) -> [usize; 4] {
        let size = self.image_size as usize;
        [self.len(), 3, size, size]
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CaptionCollator {
    pub image_size: u32,
}

impl CaptionCollator {
    pub fn new(image_size: u32) -> Self {
        Self { image_size }
    }

    pub fn collate(&self, examples: &[CaptionExample]) -> TrainingResult<CaptionBatch> {
        if examples.is_empty() {
            return Err(TrainingError::Dataset("cannot collate an empty batch".to_string()));
        }

        let size = self.image_size;
        let plane = (size as usize) * (size as usize);
        let mut pixel_values = Vec::with_capacity(examples.len() * 3 * plane);

        for ex in examples {
            let img = image::open(&ex.image).map_err(|e| {
                TrainingError::Dataset(format!("failed to decode {}: {}", ex.image.display(), e))
            })?;
            let rgb = img.resize_exact(size, size, FilterType::CatmullRom).to_rgb8();

            for channel in 0..3 {
                pixel_values.extend(
                    rgb.pixels().map(|p| (f32::from(p[channel]) / 255.0 - IMAGE_MEAN) / IMAGE_STD),
                );
            }
        }

        Ok(CaptionBatch {
            prefixes: examples.iter().map(|e| e.prefix.clone()).collect(),
            suffixes: examples.iter().map(|e| e.suffix.clone()).collect(),
            pixel_values,
            image_size: size,
        })
    }

    /// Collate the first `batches` batches of `batch_size`; surfaces unreadable images before launch.
    pub fn preflight(&self, examples: &[CaptionExample], batch_size: usize, batches: usize) -> TrainingResult<usize> {
        let mut checked = 0;
        for chunk in examples.chunks(batch_size.max(1)).take(batches) {
            let batch = self.collate(chunk)?;
            checked += batch.len();
        }
        Ok(checked)
    }
}
