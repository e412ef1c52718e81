//! Stream manager: the concurrency-safe directory of running workers.
//!
//! The worker directory is the only shared mutable structure in the core.
//! All directory access happens under one mutex, so `start`/`stop`/
//! `list_status` never observe a half-updated entry and at most one worker
//! is registered per stream id. The stop wait happens outside the lock: a
//! slow worker delays its own stop call, never status listing or other
//! streams. While a worker drains, its id sits in a draining set that
//! `start` consults, so the id is not reusable until the old worker has
//! actually exited (or the bounded wait gave up and detached it).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::infer::InferenceRegistry;
use crate::source::CaptureSettings;
use crate::storage::{AlertSink, ResultSink, StreamStore};
use crate::worker::{StreamWorker, WorkerHandle, WorkerPhase};
use crate::{StreamConfig, StreamStatus};

/// Bound on how long `stop` waits for a worker to exit.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Default)]
struct WorkerDirectory {
    workers: HashMap<String, WorkerHandle>,
    /// Ids whose worker has been signalled but has not finished its stop
    /// wait. Reserved against restart.
    draining: HashSet<String>,
}

pub struct StreamManager {
    registry: Arc<InferenceRegistry>,
    results: Arc<dyn ResultSink>,
    alerts: Arc<dyn AlertSink>,
    settings: CaptureSettings,
    stop_timeout: Duration,
    directory: Mutex<WorkerDirectory>,
}

impl StreamManager {
    pub fn new(
        registry: Arc<InferenceRegistry>,
        results: Arc<dyn ResultSink>,
        alerts: Arc<dyn AlertSink>,
        settings: CaptureSettings,
    ) -> Self {
        Self {
            registry,
            results,
            alerts,
            settings,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            directory: Mutex::new(WorkerDirectory::default()),
        }
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &InferenceRegistry {
        &self.registry
    }

    fn lock_directory(&self) -> MutexGuard<'_, WorkerDirectory> {
        // A directory operation cannot leave it inconsistent, so a poisoned
        // lock is recoverable.
        self.directory.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Launch a worker for `config`. Returns false when a worker is already
    /// registered under the same stream id, including one still draining
    /// after a stop request.
    pub fn start(&self, config: StreamConfig) -> bool {
        let mut directory = self.lock_directory();
        if directory.workers.contains_key(&config.stream_id)
            || directory.draining.contains(&config.stream_id)
        {
            log::warn!("stream '{}' is already running", config.stream_id);
            return false;
        }
        let stream_id = config.stream_id.clone();
        log::info!(
            "starting stream '{}' from source '{}' with models {:?}",
            stream_id,
            config.source,
            config.models
        );
        match StreamWorker::spawn(
            config,
            self.settings,
            self.registry.clone(),
            self.results.clone(),
            self.alerts.clone(),
        ) {
            Ok(handle) => {
                directory.workers.insert(stream_id, handle);
                true
            }
            Err(e) => {
                log::error!("failed to spawn worker for stream '{}': {}", stream_id, e);
                false
            }
        }
    }

    /// Stop a running stream. Returns false when the id is unknown.
    ///
    /// The worker moves from the directory into the draining set under one
    /// lock acquisition, then the cooperative stop wait (bounded by the
    /// configured timeout) happens outside the lock, so concurrent control
    /// operations never block on a draining worker. The id stays reserved
    /// against restart until the wait finishes; a worker that outlives the
    /// timeout is detached and logged as a leak, and only then does the id
    /// become reusable.
    pub fn stop(&self, stream_id: &str) -> bool {
        let handle = {
            let mut directory = self.lock_directory();
            match directory.workers.remove(stream_id) {
                Some(handle) => {
                    directory.draining.insert(stream_id.to_string());
                    handle
                }
                None => {
                    log::warn!("stop requested for unknown stream '{}'", stream_id);
                    return false;
                }
            }
        };
        handle.stop(self.stop_timeout);
        self.lock_directory().draining.remove(stream_id);
        true
    }

    /// Point-in-time status snapshot, sorted by stream id. Reads only the
    /// handle's config and the worker's atomic phase; never blocks on
    /// worker internals.
    pub fn list_status(&self) -> Vec<StreamStatus> {
        let directory = self.lock_directory();
        let mut statuses: Vec<StreamStatus> = directory
            .workers
            .values()
            .map(|handle| StreamStatus {
                stream_id: handle.config.stream_id.clone(),
                source: handle.config.source.clone(),
                running: handle.shared.phase() != WorkerPhase::Stopped,
                models: handle.config.models.clone(),
            })
            .collect();
        statuses.sort_by(|a, b| a.stream_id.cmp(&b.stream_id));
        statuses
    }

    /// True while a worker holds the id, draining included.
    pub fn is_running(&self, stream_id: &str) -> bool {
        let directory = self.lock_directory();
        directory.workers.contains_key(stream_id) || directory.draining.contains(stream_id)
    }

    /// Start every stream the store marks active. Already-running ids are
    /// skipped by the usual `start` duplicate check. Returns the number of
    /// streams started.
    pub fn restore_streams(&self, store: &dyn StreamStore) -> usize {
        let stored = match store.stream_configs() {
            Ok(stored) => stored,
            Err(e) => {
                log::warn!("failed to load stored streams: {}", e);
                return 0;
            }
        };
        let mut started = 0;
        for entry in stored {
            if entry.status != "active" || !entry.config.enabled {
                continue;
            }
            if self.start(entry.config) {
                started += 1;
            }
        }
        started
    }

    /// Stop every registered stream. Used at daemon shutdown.
    pub fn stop_all(&self) {
        let ids: Vec<String> = {
            let directory = self.lock_directory();
            directory.workers.keys().cloned().collect()
        };
        for stream_id in ids {
            self.stop(&stream_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register_builtin_models;
    use crate::storage::InMemoryStorage;

    fn test_manager() -> (StreamManager, Arc<InMemoryStorage>) {
        let mut registry = InferenceRegistry::new();
        register_builtin_models(&mut registry);
        let storage = Arc::new(InMemoryStorage::new());
        let manager = StreamManager::new(
            Arc::new(registry),
            storage.clone(),
            storage.clone(),
            CaptureSettings {
                fps: 50.0,
                width: 64,
                height: 48,
            },
        );
        (manager, storage)
    }

    fn stub_config(stream_id: &str) -> StreamConfig {
        StreamConfig {
            stream_id: stream_id.to_string(),
            source: "stub://cam".to_string(),
            models: vec!["defect_analysis".to_string()],
            enabled: true,
        }
    }

    #[test]
    fn duplicate_start_is_rejected() {
        let (manager, _storage) = test_manager();
        assert!(manager.start(stub_config("s1")));
        assert!(!manager.start(stub_config("s1")));
        assert_eq!(manager.list_status().len(), 1);
        manager.stop_all();
    }

    #[test]
    fn stop_unknown_stream_is_rejected() {
        let (manager, _storage) = test_manager();
        assert!(!manager.stop("ghost"));
        assert!(manager.list_status().is_empty());
    }

    #[test]
    fn stopped_stream_leaves_the_directory() {
        let (manager, _storage) = test_manager();
        assert!(manager.start(stub_config("s1")));
        assert!(manager.stop("s1"));
        assert!(manager.list_status().is_empty());
        assert!(!manager.is_running("s1"));
        // The id can be reused after stop.
        assert!(manager.start(stub_config("s1")));
        manager.stop_all();
    }

    #[test]
    fn list_status_is_sorted_and_idempotent() {
        let (manager, _storage) = test_manager();
        assert!(manager.start(stub_config("s2")));
        assert!(manager.start(stub_config("s1")));

        let first = manager.list_status();
        let second = manager.list_status();
        assert_eq!(first, second);
        assert_eq!(first[0].stream_id, "s1");
        assert_eq!(first[1].stream_id, "s2");
        assert!(first.iter().all(|s| s.running));
        assert_eq!(first[0].models, vec!["defect_analysis"]);
        manager.stop_all();
    }

    #[test]
    fn restore_streams_starts_only_active_entries() {
        let (manager, storage) = test_manager();
        storage.save_stream(&stub_config("a")).unwrap();
        storage.save_stream(&stub_config("b")).unwrap();
        storage.set_stream_status("b", "stopped").unwrap();

        assert_eq!(manager.restore_streams(storage.as_ref()), 1);
        assert!(manager.is_running("a"));
        assert!(!manager.is_running("b"));

        // A second restore finds the active id already running.
        assert_eq!(manager.restore_streams(storage.as_ref()), 0);
        manager.stop_all();
    }

    #[test]
    fn stop_all_drains_the_directory() {
        let (manager, _storage) = test_manager();
        for id in ["a", "b", "c"] {
            assert!(manager.start(stub_config(id)));
        }
        manager.stop_all();
        assert!(manager.list_status().is_empty());
    }
}
