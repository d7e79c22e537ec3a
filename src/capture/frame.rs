//! Frame type representing one RGB image handed to the classifier.

use image::{DynamicImage, ImageBuffer, Rgb};
use std::time::Instant;

/// Bytes per pixel of the interleaved RGB8 layout.
pub const CHANNELS: usize = 3;

/// A single RGB frame, sampled from a live stream or decoded from a still image.
///
/// Frames are transient: they are consumed by the classifier right after
/// capture and never stored.
#[derive(Clone)]
pub struct Frame {
    /// Interleaved RGB8 pixel data, row-major.
    pixels: Vec<u8>,
    /// Frame width in pixels.
    width: u32,
    /// Frame height in pixels.
    height: u32,
    /// Capture timestamp.
    timestamp: Instant,
    /// Monotonic sequence number within the producing stream.
    sequence: u64,
}

impl Frame {
    /// Creates a new frame from interleaved RGB8 pixels.
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> Self {
        Self {
            pixels,
            width,
            height,
            timestamp: Instant::now(),
            sequence,
        }
    }

    /// Converts a decoded still image into a frame.
    pub fn from_image(image: &DynamicImage, sequence: u64) -> Self {
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();
        Self::new(rgb.into_raw(), width, height, sequence)
    }

    /// Returns a reference to the raw pixel data.
    #[inline]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Returns the capture timestamp.
    #[inline]
    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    /// Returns the sequence number.
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Returns the total number of pixels (width * height).
    #[inline]
    pub fn pixel_count(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    /// Validates that the pixel buffer size matches dimensions.
    pub fn is_valid(&self) -> bool {
        self.pixel_count() > 0 && self.pixels.len() == self.pixel_count() * CHANNELS
    }

    /// Borrows the frame as an `image` buffer, or `None` if the buffer is malformed.
    pub fn as_rgb_image(&self) -> Option<ImageBuffer<Rgb<u8>, &[u8]>> {
        if !self.is_valid() {
            return None;
        }
        ImageBuffer::from_raw(self.width, self.height, self.pixels.as_slice())
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("pixel_bytes", &self.pixels.len())
            .finish()
    }
}
