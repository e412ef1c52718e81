//! Local capture device source.
//!
//! A digit-only descriptor ("0", "1") names `/dev/video{N}`. This build
//! reads raw frames straight off the capture node at the configured
//! dimensions; it does not negotiate formats with the driver, so the node
//! must already be producing packed RGB24 (or an upstream loopback device
//! must be feeding it). A missing node fails acquisition and the worker
//! degrades to a synthetic source.
//!
//! Read failures on a device are treated as transient: the worker retries
//! with a short backoff instead of tearing the stream down.

use anyhow::{anyhow, Result};
use std::fs::File;
use std::io::Read;

use crate::frame::Frame;

use super::{CaptureSettings, FrameRead, VideoSource};

pub struct DeviceSource {
    descriptor: String,
    node_path: String,
    file: File,
    settings: CaptureSettings,
    frame_bytes: usize,
}

impl DeviceSource {
    pub fn open(descriptor: &str, index: u32, settings: CaptureSettings) -> Result<Self> {
        let frame_bytes = Frame::byte_len(settings.width, settings.height);
        if frame_bytes == 0 {
            return Err(anyhow!("capture dimensions must be non-zero"));
        }
        let node_path = format!("/dev/video{}", index);
        let file = File::open(&node_path)
            .map_err(|e| anyhow!("failed to open capture device {}: {}", node_path, e))?;
        log::info!(
            "device source {} opened at {}x{}",
            node_path,
            settings.width,
            settings.height
        );
        Ok(Self {
            descriptor: descriptor.to_string(),
            node_path,
            file,
            settings,
            frame_bytes,
        })
    }
}

impl VideoSource for DeviceSource {
    fn read_frame(&mut self) -> Result<FrameRead> {
        let mut pixels = vec![0u8; self.frame_bytes];
        let mut filled = 0;
        while filled < self.frame_bytes {
            let n = self
                .file
                .read(&mut pixels[filled..])
                .map_err(|e| anyhow!("read from {} failed: {}", self.node_path, e))?;
            if n == 0 {
                return Err(anyhow!("capture device {} returned no data", self.node_path));
            }
            filled += n;
        }
        Ok(FrameRead::Frame(Frame::new(
            pixels,
            self.settings.width,
            self.settings.height,
        )))
    }

    fn seek_to_start(&mut self) -> Result<()> {
        // Live devices have no beginning to seek to.
        Ok(())
    }

    fn descriptor(&self) -> &str {
        &self.descriptor
    }

    fn is_live(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_fails_for_absent_device_node() {
        // Device index 250 is never populated on test hosts.
        let err = DeviceSource::open("250", 250, CaptureSettings::default());
        assert!(err.is_err());
    }
}
