use std::path::Path;

use image::{imageops, DynamicImage};

use crate::config::Florence2Config;
use crate::error::Florence2Error;
use crate::tensor::Tensor;

/// Converts images into the normalized `[1, 3, H, W]` tensor expected by the vision encoder.
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    size: u32,
    mean: [f32; 3],
    std: [f32; 3],
}

impl ImagePreprocessor {
    /// Create a preprocessor producing `size x size` images.
    ///
    /// # Arguments
    ///
    /// * `size` - The side of the square output image.
    /// * `mean` - Per-channel mean subtracted after scaling to [0, 1].
    /// * `std` - Per-channel standard deviation dividing the centered values.
    pub fn new(size: u32, mean: [f32; 3], std: [f32; 3]) -> Self {
        Self { size, mean, std }
    }

    pub fn from_config(config: &Florence2Config) -> Self {
        Self::new(config.image_size, config.image_mean, config.image_std)
    }

    /// Load an image from disk and preprocess it.
    pub fn process_path(&self, path: impl AsRef<Path>) -> Result<Tensor<f32>, Florence2Error> {
        let image = load_image(path)?;
        self.process(&image)
    }

    /// Decode an encoded image (png, jpeg) and preprocess it.
    pub fn process_bytes(&self, bytes: &[u8]) -> Result<Tensor<f32>, Florence2Error> {
        let image = image::load_from_memory(bytes)?;
        self.process(&image)
    }

    /// Preprocess a decoded image.
    ///
    /// The image is converted to rgb8, resized to `size x size` with a Lanczos3 filter, scaled to
    /// [0, 1], laid out as CHW, normalized per channel and given a batch axis of 1.
    pub fn process(&self, image: &DynamicImage) -> Result<Tensor<f32>, Florence2Error> {
        let rgb = image.to_rgb8();
        let resized = imageops::resize(&rgb, self.size, self.size, imageops::FilterType::Lanczos3);

        let (width, height) = (resized.width() as usize, resized.height() as usize);
        let plane = width * height;
        let mut data = vec![0.0f32; 3 * plane];

        for (idx, pixel) in resized.pixels().enumerate() {
            for c in 0..3 {
                let value = pixel[c] as f32 / 255.0;
                data[c * plane + idx] = (value - self.mean[c]) / self.std[c];
            }
        }

        log::debug!(
            "preprocessed image {}x{} -> [1, 3, {}, {}]",
            image.width(),
            image.height(),
            height,
            width
        );

        Tensor::from_shape_vec(vec![1, 3, height, width], data)
    }
}

/// Read and decode an image file.
pub fn load_image(path: impl AsRef<Path>) -> Result<DynamicImage, Florence2Error> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(Florence2Error::IoError(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Image file not found: {}", path.display()),
        )));
    }
    Ok(image::open(path)?)
}
