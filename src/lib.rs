//! Video Management System kernel.
//!
//! This crate implements the stream processing engine for a VMS: it ingests
//! frames from any number of independently controlled video sources, runs a
//! configurable set of named inference models against each sampled frame,
//! persists per-frame results, and raises threshold-based alerts.
//!
//! # Architecture
//!
//! - `source`: frame sources (capture devices, raw file sequences, synthetic)
//! - `infer`: the inference registry and the builtin analysis models
//! - `alerts`: data-driven threshold rules over model summaries
//! - `worker`: one acquisition-and-inference loop per running stream
//! - `manager`: the concurrency-safe directory of running workers
//! - `storage`: result/alert sinks (SQLite and in-memory)
//! - `api`: the local control surface consumed by operators
//!
//! Every worker owns its source handle and stream state exclusively. The
//! only shared mutable structure in the core is the manager's worker map,
//! guarded by a mutex. Failure inside a cycle (bad frame, bad model, slow
//! sink) is absorbed at the loop boundary; only a cooperative stop signal
//! terminates a worker.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub mod alerts;
pub mod api;
pub mod config;
pub mod frame;
pub mod infer;
pub mod manager;
pub mod source;
pub mod storage;
pub mod worker;

pub use alerts::{Alert, Severity};
pub use frame::Frame;
pub use infer::{
    register_builtin_models, InferenceCapability, InferenceRegistry, InferenceResult,
};
pub use manager::StreamManager;
pub use source::{open_source, FrameRead, SourceKind, SyntheticSource, VideoSource};
pub use storage::{
    AlertSink, InMemoryStorage, ResultSink, SqliteStorage, StoredStream, StreamStore,
};
pub use worker::WorkerPhase;

/// Model output map. The schema is model-defined; the kernel treats it as
/// opaque key/value data.
pub type Summary = serde_json::Map<String, serde_json::Value>;

/// Epoch seconds with sub-second precision.
pub fn now_ts() -> Result<f64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs_f64())
}

// -------------------- Stream configuration --------------------

fn default_enabled() -> bool {
    true
}

/// Configuration for one stream: a source descriptor plus the models to run
/// against each sampled frame.
///
/// Immutable once a worker is started; changing a stream's configuration
/// requires stop + restart.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StreamConfig {
    /// Caller-assigned unique identifier.
    pub stream_id: String,
    /// Source descriptor: a capture device index ("0"), a local file path,
    /// a network URL, or "stub://..." for a synthetic source.
    pub source: String,
    /// Model names to run each cycle, in order.
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// Point-in-time view of one running stream, as reported by the manager.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StreamStatus {
    pub stream_id: String,
    pub source: String,
    pub running: bool,
    pub models: Vec<String>,
}

// -------------------- Persisted results --------------------

/// One model's output for one captured frame. Append-only; retention is a
/// sink concern.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FrameResult {
    pub stream_id: String,
    pub model: String,
    /// Capture time, epoch seconds. Non-decreasing within a stream.
    pub timestamp: f64,
    pub summary: Summary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_ts_is_positive_and_monotonicish() {
        let a = now_ts().unwrap();
        let b = now_ts().unwrap();
        assert!(a > 1_600_000_000.0);
        assert!(b >= a);
    }

    #[test]
    fn stream_config_enabled_defaults_true() {
        let cfg: StreamConfig =
            serde_json::from_str(r#"{"stream_id":"s1","source":"stub://cam"}"#).unwrap();
        assert!(cfg.enabled);
        assert!(cfg.models.is_empty());
    }
}
