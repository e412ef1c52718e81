//! Captured frame container.
//!
//! Frames are packed RGB24: `width * height * 3` bytes, row-major. Sources
//! produce them, inference capabilities read them, and nothing outside the
//! owning worker keeps a reference past the cycle that captured it.

/// One decoded video frame (packed RGB24).
#[derive(Clone, Debug)]
pub struct Frame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            pixels,
            width,
            height,
        }
    }

    /// Expected byte length of a packed RGB24 frame at these dimensions.
    pub fn byte_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 3
    }

    /// Mean pixel intensity across all channels. Used by analysis models.
    pub fn mean_intensity(&self) -> f64 {
        if self.pixels.is_empty() {
            return 0.0;
        }
        let sum: u64 = self.pixels.iter().map(|&p| p as u64).sum();
        sum as f64 / self.pixels.len() as f64
    }
}

/// Generate deterministic synthetic pixels for a frame.
///
/// Simulates a scene with occasional changes: most frames are a slowly
/// shifting pattern, and every 50 frames the scene state advances so that
/// change-sensitive models see "motion".
pub(crate) fn synthetic_pixels(
    width: u32,
    height: u32,
    frame_index: u64,
    scene_state: u8,
) -> Vec<u8> {
    let mut pixels = vec![0u8; Frame::byte_len(width, height)];
    for (i, pixel) in pixels.iter_mut().enumerate() {
        *pixel = ((i as u64 + frame_index + scene_state as u64) % 256) as u8;
    }
    pixels
}
