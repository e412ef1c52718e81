//! Synthetic frame source.
//!
//! Serves two roles: `stub://` descriptors in tests and demos, and the
//! degraded-mode fallback when a real source cannot be acquired. Frames are
//! deterministic patterns with a scene change every 50 frames so that
//! change-sensitive models produce varied output.

use anyhow::Result;

use crate::frame::{synthetic_pixels, Frame};

use super::{CaptureSettings, FrameRead, VideoSource};

pub struct SyntheticSource {
    descriptor: String,
    settings: CaptureSettings,
    frame_count: u64,
    scene_state: u8,
}

impl SyntheticSource {
    pub fn new(descriptor: &str, settings: CaptureSettings) -> Self {
        Self {
            descriptor: descriptor.to_string(),
            settings,
            frame_count: 0,
            scene_state: 0,
        }
    }

    pub fn frames_generated(&self) -> u64 {
        self.frame_count
    }
}

impl VideoSource for SyntheticSource {
    fn read_frame(&mut self) -> Result<FrameRead> {
        self.frame_count += 1;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let pixels = synthetic_pixels(
            self.settings.width,
            self.settings.height,
            self.frame_count,
            self.scene_state,
        );
        Ok(FrameRead::Frame(Frame::new(
            pixels,
            self.settings.width,
            self.settings.height,
        )))
    }

    fn seek_to_start(&mut self) -> Result<()> {
        // Infinite source; nothing to rewind.
        Ok(())
    }

    fn descriptor(&self) -> &str {
        &self.descriptor
    }

    fn is_live(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_source_never_ends() {
        let mut source = SyntheticSource::new("stub://test", CaptureSettings::default());
        for _ in 0..120 {
            match source.read_frame().unwrap() {
                FrameRead::Frame(frame) => {
                    assert_eq!(frame.width, 640);
                    assert_eq!(frame.height, 480);
                    assert_eq!(frame.pixels.len(), Frame::byte_len(640, 480));
                }
                FrameRead::EndOfStream => panic!("synthetic source must not end"),
            }
        }
        assert_eq!(source.frames_generated(), 120);
    }

    #[test]
    fn scene_changes_over_time() {
        let settings = CaptureSettings {
            fps: 5.0,
            width: 32,
            height: 24,
        };
        let mut source = SyntheticSource::new("stub://test", settings);
        let FrameRead::Frame(first) = source.read_frame().unwrap() else {
            panic!("expected frame");
        };
        let mut changed = false;
        for _ in 0..60 {
            if let FrameRead::Frame(frame) = source.read_frame().unwrap() {
                if frame.pixels != first.pixels {
                    changed = true;
                }
            }
        }
        assert!(changed);
    }
}
