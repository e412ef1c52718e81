//! Frame acquisition sources.
//!
//! A stream's `source` descriptor selects the kind of source:
//! - a small non-negative integer ("0", "1") names a local capture device;
//! - a `stub://` URL names a synthetic source (tests, demos);
//! - any other string with a `://` scheme names a network stream;
//! - everything else is a local file path holding a raw RGB24 frame
//!   sequence.
//!
//! Sources are exclusively owned by the worker that opened them and are
//! released on drop. Acquisition failure is not fatal to a stream: the
//! worker falls back to a synthetic source so downstream inference,
//! persistence, and alerting stay exercised and observable.

use anyhow::{bail, Result};

use crate::frame::Frame;

mod device;
mod file;
mod synthetic;

pub use device::DeviceSource;
pub use file::FileSource;
pub use synthetic::SyntheticSource;

/// Capture parameters shared by all sources of a stream.
#[derive(Clone, Copy, Debug)]
pub struct CaptureSettings {
    /// Target cycle rate for the worker loop, frames per second.
    pub fps: f64,
    /// Frame width in pixels (raw file parsing, synthetic generation).
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            fps: 5.0,
            width: 640,
            height: 480,
        }
    }
}

/// Outcome of one read attempt.
pub enum FrameRead {
    Frame(Frame),
    /// The source is exhausted. Workers seek back to the start; a finite
    /// source logically repeats forever.
    EndOfStream,
}

/// A video source owned by exactly one stream worker.
pub trait VideoSource: Send {
    /// Read the next frame. `Err` from a live source is a transient hiccup
    /// the worker retries with backoff; `Err` from a non-live source is
    /// logged and the cycle skipped.
    fn read_frame(&mut self) -> Result<FrameRead>;

    /// Rewind to the first frame. Called after `EndOfStream`.
    fn seek_to_start(&mut self) -> Result<()>;

    /// The descriptor this source was opened from.
    fn descriptor(&self) -> &str;

    /// Live capture device: read failures are retried rather than treated
    /// as end of data.
    fn is_live(&self) -> bool;
}

/// Source kind, determined by descriptor syntax.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceKind {
    /// Local capture device index (descriptor was a small integer).
    Device(u32),
    /// Local file path.
    File(String),
    /// Network stream URL (rtsp://, http://, ...).
    Network(String),
    /// Synthetic stub source (stub://...).
    Synthetic(String),
}

impl SourceKind {
    pub fn classify(descriptor: &str) -> SourceKind {
        let trimmed = descriptor.trim();
        if !trimmed.is_empty() && trimmed.len() <= 3 && trimmed.bytes().all(|b| b.is_ascii_digit())
        {
            if let Ok(index) = trimmed.parse::<u32>() {
                return SourceKind::Device(index);
            }
        }
        if trimmed.starts_with("stub://") {
            return SourceKind::Synthetic(trimmed.to_string());
        }
        if trimmed.contains("://") {
            return SourceKind::Network(trimmed.to_string());
        }
        SourceKind::File(trimmed.to_string())
    }
}

/// Open the source named by `descriptor`.
///
/// Returns `Err` when the source cannot be acquired (missing file, absent
/// device node, unsupported network scheme). Callers degrade to a
/// `SyntheticSource` rather than failing the stream.
pub fn open_source(descriptor: &str, settings: CaptureSettings) -> Result<Box<dyn VideoSource>> {
    match SourceKind::classify(descriptor) {
        SourceKind::Device(index) => Ok(Box::new(DeviceSource::open(descriptor, index, settings)?)),
        SourceKind::File(path) => Ok(Box::new(FileSource::open(&path, settings)?)),
        SourceKind::Synthetic(_) => Ok(Box::new(SyntheticSource::new(descriptor, settings))),
        SourceKind::Network(url) => {
            bail!("network source '{}' is not supported by this build", url)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_device_indexes() {
        assert_eq!(SourceKind::classify("0"), SourceKind::Device(0));
        assert_eq!(SourceKind::classify("12"), SourceKind::Device(12));
        // Long digit runs read as file names, not device indexes.
        assert_eq!(
            SourceKind::classify("20240101"),
            SourceKind::File("20240101".to_string())
        );
    }

    #[test]
    fn classify_paths_and_urls() {
        assert_eq!(
            SourceKind::classify("/data/road.raw"),
            SourceKind::File("/data/road.raw".to_string())
        );
        assert_eq!(
            SourceKind::classify("rtsp://cam.local/stream"),
            SourceKind::Network("rtsp://cam.local/stream".to_string())
        );
        assert_eq!(
            SourceKind::classify("stub://front"),
            SourceKind::Synthetic("stub://front".to_string())
        );
    }

    #[test]
    fn open_source_rejects_network_urls() {
        let err = open_source("rtsp://cam.local/stream", CaptureSettings::default());
        assert!(err.is_err());
    }

    #[test]
    fn open_source_rejects_missing_files() {
        let err = open_source("/nonexistent.mp4", CaptureSettings::default());
        assert!(err.is_err());
    }

    #[test]
    fn open_source_accepts_stub_descriptors() {
        let source = open_source("stub://test", CaptureSettings::default()).unwrap();
        assert!(!source.is_live());
        assert_eq!(source.descriptor(), "stub://test");
    }
}
