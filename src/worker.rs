//! Stream worker: one acquisition-and-inference loop per running stream.
//!
//! A worker owns its video source and stream state exclusively; the manager
//! holds only a handle (stop flag, done channel, join handle, and a shared
//! read-only snapshot). Lifecycle:
//!
//! ```text
//! Opening -> Running <-> Degraded -> Stopping -> Stopped
//! ```
//!
//! Acquisition failure drops the worker into degraded synthetic mode rather
//! than killing it: placeholder frames keep the model/alert/persistence
//! path exercised until an operator stops the stream. Inside the loop, a
//! transient device read error is retried with backoff, end-of-stream on a
//! file source rewinds to the start, and every other error is logged and
//! absorbed at the cycle boundary. The only exits are the cooperative stop
//! flag and process exit.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::infer::InferenceRegistry;
use crate::source::{open_source, CaptureSettings, FrameRead, SyntheticSource, VideoSource};
use crate::storage::{AlertSink, ResultSink};
use crate::{alerts, now_ts, FrameResult, StreamConfig};

/// Backoff after a failed read from a live device.
const READ_RETRY_BACKOFF: Duration = Duration::from_millis(100);
/// Log cadence for the per-stream frame counter.
const FRAME_LOG_INTERVAL: u64 = 30;

/// Worker lifecycle phase, shared with the manager as an atomic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerPhase {
    Opening = 0,
    Running = 1,
    Degraded = 2,
    Stopping = 3,
    Stopped = 4,
}

impl WorkerPhase {
    fn from_u8(value: u8) -> WorkerPhase {
        match value {
            0 => WorkerPhase::Opening,
            1 => WorkerPhase::Running,
            2 => WorkerPhase::Degraded,
            3 => WorkerPhase::Stopping,
            _ => WorkerPhase::Stopped,
        }
    }
}

/// Read-only view of a worker, written only by the worker itself.
pub(crate) struct WorkerShared {
    phase: AtomicU8,
    frames: AtomicU64,
}

impl WorkerShared {
    fn new() -> Self {
        Self {
            phase: AtomicU8::new(WorkerPhase::Opening as u8),
            frames: AtomicU64::new(0),
        }
    }

    fn set_phase(&self, phase: WorkerPhase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    pub(crate) fn phase(&self) -> WorkerPhase {
        WorkerPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub(crate) fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

/// Handle the manager keeps for a spawned worker.
pub(crate) struct WorkerHandle {
    pub(crate) config: Arc<StreamConfig>,
    pub(crate) shared: Arc<WorkerShared>,
    stop: Arc<AtomicBool>,
    done_rx: mpsc::Receiver<()>,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Signal cooperative stop and wait up to `timeout` for the loop to
    /// exit. A worker that misses the deadline is detached and logged as a
    /// leak; the control plane treats the stream as stopped either way.
    pub(crate) fn stop(mut self, timeout: Duration) {
        self.stop.store(true, Ordering::SeqCst);
        match self.done_rx.recv_timeout(timeout) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                if let Some(join) = self.join.take() {
                    if join.join().is_err() {
                        log::error!("stream '{}' worker thread panicked", self.config.stream_id);
                    }
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                log::warn!(
                    "stream '{}' did not stop within {:?}; detaching worker (resource leak)",
                    self.config.stream_id,
                    timeout
                );
            }
        }
    }
}

pub(crate) struct StreamWorker {
    config: Arc<StreamConfig>,
    settings: CaptureSettings,
    registry: Arc<InferenceRegistry>,
    results: Arc<dyn ResultSink>,
    alerts: Arc<dyn AlertSink>,
    stop: Arc<AtomicBool>,
    shared: Arc<WorkerShared>,
    last_ts: f64,
}

impl StreamWorker {
    /// Launch a worker thread for `config` and return its handle.
    pub(crate) fn spawn(
        config: StreamConfig,
        settings: CaptureSettings,
        registry: Arc<InferenceRegistry>,
        results: Arc<dyn ResultSink>,
        alerts: Arc<dyn AlertSink>,
    ) -> Result<WorkerHandle> {
        let config = Arc::new(config);
        let stop = Arc::new(AtomicBool::new(false));
        let shared = Arc::new(WorkerShared::new());
        let (done_tx, done_rx) = mpsc::channel();

        let mut worker = StreamWorker {
            config: config.clone(),
            settings,
            registry,
            results,
            alerts,
            stop: stop.clone(),
            shared: shared.clone(),
            last_ts: 0.0,
        };
        let join = std::thread::Builder::new()
            .name(format!("stream-{}", config.stream_id))
            .spawn(move || {
                worker.run();
                let _ = done_tx.send(());
            })?;

        Ok(WorkerHandle {
            config,
            shared,
            stop,
            done_rx,
            join: Some(join),
        })
    }

    fn run(&mut self) {
        let stream_id = self.config.stream_id.clone();
        let mut source = self.acquire_source();
        let budget = Duration::from_secs_f64(1.0 / self.settings.fps);

        while !self.stop.load(Ordering::SeqCst) {
            let cycle_start = Instant::now();
            if let Err(e) = self.run_cycle(source.as_mut()) {
                // Cycle errors never terminate the worker.
                log::error!("stream '{}': {}", stream_id, e);
            }
            let elapsed = cycle_start.elapsed();
            if elapsed < budget {
                std::thread::sleep(budget - elapsed);
            }
        }

        self.shared.set_phase(WorkerPhase::Stopping);
        drop(source);
        self.shared.set_phase(WorkerPhase::Stopped);
        log::info!(
            "stream '{}' stopped after {} frames",
            stream_id,
            self.shared.frames()
        );
    }

    /// Open the configured source, degrading to synthetic frames when the
    /// real one is unreachable. The failure is logged once, not per cycle.
    fn acquire_source(&self) -> Box<dyn VideoSource> {
        match open_source(&self.config.source, self.settings) {
            Ok(source) => {
                log::info!(
                    "stream '{}' opened source '{}'",
                    self.config.stream_id,
                    self.config.source
                );
                self.shared.set_phase(WorkerPhase::Running);
                source
            }
            Err(e) => {
                log::warn!(
                    "stream '{}' failed to open source '{}' ({}); \
                     falling back to synthetic frames",
                    self.config.stream_id,
                    self.config.source,
                    e
                );
                self.shared.set_phase(WorkerPhase::Degraded);
                Box::new(SyntheticSource::new(&self.config.source, self.settings))
            }
        }
    }

    fn run_cycle(&mut self, source: &mut dyn VideoSource) -> Result<()> {
        let frame = match source.read_frame() {
            Ok(FrameRead::Frame(frame)) => frame,
            Ok(FrameRead::EndOfStream) => {
                // Finite sources logically repeat forever.
                source.seek_to_start()?;
                return Ok(());
            }
            Err(e) => {
                if source.is_live() {
                    log::debug!(
                        "stream '{}' read failed ({}); retrying",
                        self.config.stream_id,
                        e
                    );
                    std::thread::sleep(READ_RETRY_BACKOFF);
                    return Ok(());
                }
                return Err(e);
            }
        };

        let frame_count = self.shared.frames.fetch_add(1, Ordering::Relaxed) + 1;
        if frame_count % FRAME_LOG_INTERVAL == 0 {
            log::debug!(
                "stream '{}' processed frame {}",
                self.config.stream_id,
                frame_count
            );
        }

        // Clamp so timestamps never regress within a stream.
        let ts = now_ts()?.max(self.last_ts);
        self.last_ts = ts;

        let outputs = self.registry.run_all(&frame, &self.config.models);
        for (model, output) in outputs {
            let result = FrameResult {
                stream_id: self.config.stream_id.clone(),
                model: model.clone(),
                timestamp: ts,
                summary: output.summary,
            };
            if let Err(e) = self.results.add_result(&result) {
                // At-most-once delivery: the result is dropped for this cycle.
                log::warn!(
                    "stream '{}' failed to persist result for '{}': {}",
                    self.config.stream_id,
                    model,
                    e
                );
            }
            if let Some(alert) =
                alerts::evaluate(&self.config.stream_id, &model, &result.summary, ts)
            {
                log::info!(
                    "stream '{}' alert [{}] {}: {}",
                    self.config.stream_id,
                    alert.severity,
                    alert.alert_type,
                    alert.message
                );
                if let Err(e) = self.alerts.add_alert(&alert) {
                    log::warn!(
                        "stream '{}' failed to persist alert: {}",
                        self.config.stream_id,
                        e
                    );
                }
            }
        }
        Ok(())
    }
}
