//! Frame to model-input conversion.
//!
//! Frames are brought to the model's fixed square input size, channel
//! values are scaled to [0, 1], and a leading batch dimension of one is
//! added.

use crate::capture::Frame;
use image::imageops::{self, FilterType};
use image::{GenericImageView, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How a non-square frame is fitted into the square model input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResizeMode {
    /// Scale both axes independently to the input size.
    #[default]
    Stretch,
    /// Take the largest centered square, then scale it.
    CenterCrop,
}

/// Memory layout of the 4-D input tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    /// `[1, N, N, 3]`, as exported by browser-side training tools.
    #[default]
    Nhwc,
    /// `[1, 3, N, N]`, common for ONNX exports.
    Nchw,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreprocessError {
    #[error("malformed frame: {width}x{height} with {bytes} pixel bytes")]
    MalformedFrame { width: u32, height: u32, bytes: usize },
    #[error("model input size must be positive")]
    ZeroInputSize,
}

/// A batched, normalized model input.
///
/// Owned by value so that handing it to a model releases the buffer
/// as soon as the forward pass returns.
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
    data: Vec<f32>,
    shape: [usize; 4],
    layout: TensorLayout,
}

impl InputTensor {
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn shape(&self) -> [usize; 4] {
        self.shape
    }

    pub fn layout(&self) -> TensorLayout {
        self.layout
    }

    /// Consumes the tensor, returning its buffer.
    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// Returns the mean value of each RGB channel.
    pub fn channel_means(&self) -> [f32; 3] {
        let mut sums = [0f64; 3];
        let plane = self.data.len() / 3;
        if plane == 0 {
            return [0.0; 3];
        }

        for (i, &value) in self.data.iter().enumerate() {
            let channel = match self.layout {
                TensorLayout::Nhwc => i % 3,
                TensorLayout::Nchw => i / plane,
            };
            sums[channel.min(2)] += value as f64;
        }

        sums.map(|sum| (sum / plane as f64) as f32)
    }
}

/// Scales `image` to `size`×`size`, copying it when it already has that size.
fn fit<I>(image: &I, size: u32) -> RgbImage
where
    I: GenericImageView<Pixel = Rgb<u8>>,
{
    if image.dimensions() == (size, size) {
        RgbImage::from_fn(size, size, |x, y| image.get_pixel(x, y))
    } else {
        imageops::resize(image, size, size, FilterType::Triangle)
    }
}

/// Converts a frame into a `size`×`size` normalized input tensor.
pub fn preprocess(
    frame: &Frame,
    size: u32,
    mode: ResizeMode,
    layout: TensorLayout,
) -> Result<InputTensor, PreprocessError> {
    if size == 0 {
        return Err(PreprocessError::ZeroInputSize);
    }

    let view = frame
        .as_rgb_image()
        .ok_or(PreprocessError::MalformedFrame {
            width: frame.width(),
            height: frame.height(),
            bytes: frame.pixels().len(),
        })?;

    let image = match mode {
        ResizeMode::Stretch => fit(&view, size),
        ResizeMode::CenterCrop => {
            let (width, height) = view.dimensions();
            let side = width.min(height);
            let x = (width - side) / 2;
            let y = (height - side) / 2;
            fit(&*imageops::crop_imm(&view, x, y, side, side), size)
        }
    };

    let n = size as usize;
    let data = match layout {
        TensorLayout::Nhwc => image.as_raw().iter().map(|&v| v as f32 / 255.0).collect(),
        TensorLayout::Nchw => {
            let mut data = vec![0f32; 3 * n * n];
            for (x, y, pixel) in image.enumerate_pixels() {
                let offset = y as usize * n + x as usize;
                for c in 0..3 {
                    data[c * n * n + offset] = pixel[c] as f32 / 255.0;
                }
            }
            data
        }
    };

    let shape = match layout {
        TensorLayout::Nhwc => [1, n, n, 3],
        TensorLayout::Nchw => [1, 3, n, n],
    };

    Ok(InputTensor {
        data,
        shape,
        layout,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::DynamicImage;

    fn frame_from(image: RgbImage) -> Frame {
        Frame::from_image(&DynamicImage::ImageRgb8(image), 0)
    }

    #[test]
    fn test_nhwc_shape_and_values() {
        let frame = frame_from(RgbImage::from_pixel(40, 30, Rgb([255, 0, 0])));
        let tensor = preprocess(&frame, 16, ResizeMode::Stretch, TensorLayout::Nhwc).unwrap();

        assert_eq!(tensor.shape(), [1, 16, 16, 3]);
        assert_eq!(tensor.data().len(), 16 * 16 * 3);
        assert_eq!(&tensor.data()[..3], &[1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_nchw_planes() {
        let frame = frame_from(RgbImage::from_pixel(16, 16, Rgb([255, 0, 0])));
        let tensor = preprocess(&frame, 16, ResizeMode::Stretch, TensorLayout::Nchw).unwrap();

        assert_eq!(tensor.shape(), [1, 3, 16, 16]);
        let data = tensor.data();
        // First value of each channel plane
        assert_eq!(data[0], 1.0);
        assert_eq!(data[16 * 16], 0.0);
        assert_eq!(data[2 * 16 * 16], 0.0);
    }

    #[test]
    fn test_normalization() {
        let frame = frame_from(RgbImage::from_pixel(8, 8, Rgb([128, 128, 128])));
        let tensor = preprocess(&frame, 8, ResizeMode::Stretch, TensorLayout::Nhwc).unwrap();

        let expected = 128.0 / 255.0;
        assert!(tensor.data().iter().all(|v| (v - expected).abs() < 1e-4));
        assert!(tensor.channel_means().iter().all(|m| (m - expected).abs() < 1e-4));
    }

    #[test]
    fn test_center_crop_drops_side_margins() {
        // Red margin on the left quarter, green elsewhere.
        let image = RgbImage::from_fn(200, 100, |x, _| {
            if x < 50 {
                Rgb([255, 0, 0])
            } else {
                Rgb([0, 255, 0])
            }
        });
        let frame = frame_from(image);

        let cropped = preprocess(&frame, 10, ResizeMode::CenterCrop, TensorLayout::Nhwc).unwrap();
        assert_eq!(cropped.channel_means()[0], 0.0);

        let stretched = preprocess(&frame, 10, ResizeMode::Stretch, TensorLayout::Nhwc).unwrap();
        assert_eq!(stretched.data()[0], 1.0);
    }

    #[test]
    fn test_malformed_frame_rejected() {
        let frame = Frame::new(vec![0u8; 10], 4, 4, 0);
        assert!(matches!(
            preprocess(&frame, 8, ResizeMode::Stretch, TensorLayout::Nhwc),
            Err(PreprocessError::MalformedFrame { .. })
        ));
    }

    #[test]
    fn test_zero_input_size_rejected() {
        let frame = frame_from(RgbImage::from_pixel(4, 4, Rgb([0, 0, 0])));
        assert_eq!(
            preprocess(&frame, 0, ResizeMode::Stretch, TensorLayout::Nhwc),
            Err(PreprocessError::ZeroInputSize)
        );
    }
}
