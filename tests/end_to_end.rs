//! End-to-end engine behavior: degrade-not-fail acquisition, restart on
//! end-of-stream, and alerting driven by real frame content.

use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::NamedTempFile;

use vms_kernel::source::CaptureSettings;
use vms_kernel::{
    register_builtin_models, AlertSink, Frame, InMemoryStorage, InferenceRegistry, ResultSink,
    Severity, StreamConfig, StreamManager,
};

const WIDTH: u32 = 32;
const HEIGHT: u32 = 24;

fn fast_manager() -> (Arc<StreamManager>, Arc<InMemoryStorage>) {
    let mut registry = InferenceRegistry::new();
    register_builtin_models(&mut registry);
    let storage = Arc::new(InMemoryStorage::new());
    let manager = StreamManager::new(
        Arc::new(registry),
        storage.clone(),
        storage.clone(),
        CaptureSettings {
            fps: 100.0,
            width: WIDTH,
            height: HEIGHT,
        },
    );
    (Arc::new(manager), storage)
}

fn write_raw_fixture(frames: usize, fill: u8) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp fixture");
    let frame = vec![fill; Frame::byte_len(WIDTH, HEIGHT)];
    for _ in 0..frames {
        file.write_all(&frame).expect("write frame");
    }
    file.flush().expect("flush fixture");
    file
}

fn wait_for<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn unreachable_source_degrades_to_synthetic_frames() {
    let (manager, storage) = fast_manager();
    assert!(manager.start(StreamConfig {
        stream_id: "s1".to_string(),
        source: "/nonexistent.mp4".to_string(),
        models: vec!["defect_analysis".to_string()],
        enabled: true,
    }));

    wait_for("degraded-mode results", || {
        !storage.recent_results("s1", 1).unwrap().is_empty()
    });

    let results = storage.recent_results("s1", 10).unwrap();
    assert!(results.iter().all(|r| r.model == "defect_analysis"));
    assert!(results
        .iter()
        .all(|r| r.summary.contains_key("defect_score")));

    // The stream stays controllable despite the bad source.
    assert!(manager.stop("s1"));
}

#[test]
fn finite_file_source_loops_past_its_own_length() {
    let file_frames = 3;
    let fixture = write_raw_fixture(file_frames, 127);
    let (manager, storage) = fast_manager();
    assert!(manager.start(StreamConfig {
        stream_id: "s2".to_string(),
        source: fixture.path().to_str().unwrap().to_string(),
        models: vec!["defect_analysis".to_string()],
        enabled: true,
    }));

    // More results than the file has frames proves restart-on-EOF.
    wait_for("looped results", || {
        storage.recent_results("s2", usize::MAX).unwrap().len() > file_frames
    });
    assert!(manager.stop("s2"));
}

#[test]
fn defective_frames_raise_high_severity_alerts() {
    // All-black frames score >= 0.9 on defect analysis, above the 0.7
    // alert threshold.
    let fixture = write_raw_fixture(4, 0);
    let (manager, storage) = fast_manager();
    assert!(manager.start(StreamConfig {
        stream_id: "s3".to_string(),
        source: fixture.path().to_str().unwrap().to_string(),
        models: vec!["defect_analysis".to_string()],
        enabled: true,
    }));

    wait_for("defect alerts", || {
        !storage.alerts(Some(false)).unwrap().is_empty()
    });
    assert!(manager.stop("s3"));

    let alerts = storage.alerts(None).unwrap();
    assert!(alerts
        .iter()
        .all(|a| a.alert_type == "high_defect" && a.severity == Severity::High));
    assert!(alerts.iter().all(|a| a.stream_id == "s3" && !a.resolved));
}

#[test]
fn unknown_models_in_config_are_ignored() {
    let (manager, storage) = fast_manager();
    assert!(manager.start(StreamConfig {
        stream_id: "s4".to_string(),
        source: "stub://cam".to_string(),
        models: vec!["traffic_analysis".to_string(), "not_a_model".to_string()],
        enabled: true,
    }));

    wait_for("traffic results", || {
        storage.recent_results("s4", usize::MAX).unwrap().len() >= 3
    });
    assert!(manager.stop("s4"));

    let results = storage.recent_results("s4", usize::MAX).unwrap();
    assert!(results.iter().all(|r| r.model == "traffic_analysis"));
}
