//! Local file frame source.
//!
//! Reads a raw RGB24 frame sequence from a local file: each frame is
//! `width * height * 3` bytes, back to back, at the dimensions given by the
//! stream's capture settings. When fewer than a full frame remains the
//! source reports `EndOfStream`; the worker rewinds it, so a finite file
//! logically repeats forever.
//!
//! Compressed container formats (mp4, mkv) need a decode backend this build
//! does not carry; opening one as a raw sequence either fails the size check
//! or yields nonsense frames, and operators should prefer raw fixtures.

use anyhow::{anyhow, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::frame::Frame;

use super::{CaptureSettings, FrameRead, VideoSource};

pub struct FileSource {
    path: String,
    file: File,
    settings: CaptureSettings,
    frame_bytes: usize,
    frames_read: u64,
}

impl FileSource {
    pub fn open(path: &str, settings: CaptureSettings) -> Result<Self> {
        let frame_bytes = Frame::byte_len(settings.width, settings.height);
        if frame_bytes == 0 {
            return Err(anyhow!("capture dimensions must be non-zero"));
        }
        let file = File::open(Path::new(path))
            .map_err(|e| anyhow!("failed to open video file {}: {}", path, e))?;
        let len = file.metadata()?.len();
        if (len as usize) < frame_bytes {
            return Err(anyhow!(
                "video file {} is smaller than one {}x{} frame ({} bytes)",
                path,
                settings.width,
                settings.height,
                frame_bytes
            ));
        }
        Ok(Self {
            path: path.to_string(),
            file,
            settings,
            frame_bytes,
            frames_read: 0,
        })
    }
}

impl VideoSource for FileSource {
    fn read_frame(&mut self) -> Result<FrameRead> {
        let mut pixels = vec![0u8; self.frame_bytes];
        let mut filled = 0;
        while filled < self.frame_bytes {
            let n = self.file.read(&mut pixels[filled..])?;
            if n == 0 {
                // Partial trailing frame is discarded.
                return Ok(FrameRead::EndOfStream);
            }
            filled += n;
        }
        self.frames_read += 1;
        Ok(FrameRead::Frame(Frame::new(
            pixels,
            self.settings.width,
            self.settings.height,
        )))
    }

    fn seek_to_start(&mut self) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        log::debug!("file source {} rewound to start", self.path);
        Ok(())
    }

    fn descriptor(&self) -> &str {
        &self.path
    }

    fn is_live(&self) -> bool {
        false
    }
}
