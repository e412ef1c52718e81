//! Inference registry.
//!
//! Maps model names to inference capabilities. The registry is built once at
//! startup, then shared read-only across all stream workers; dispatch is a
//! name lookup followed by an isolated invocation. An unknown name is a
//! no-op, never an error, and a capability failure (an `Err` or a panic) is
//! converted into the absence of that model's result for the cycle.

use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;

use crate::frame::Frame;
use crate::Summary;

mod builtin;

pub use builtin::{
    register_builtin_models, AssetDetection, DefectAnalysis, RoadCondition, TrafficAnalysis,
};

/// A named inference model: a pure function from a frame to a summary map.
///
/// Implementations must be safe to call concurrently from multiple workers.
/// The registry isolates every invocation: a misbehaving capability loses
/// its own results but cannot take a stream down.
pub trait InferenceCapability: Send + Sync {
    fn run(&self, frame: &Frame) -> Result<Summary>;
}

/// One model's output for one frame.
#[derive(Clone, Debug)]
pub struct InferenceResult {
    pub summary: Summary,
    /// Wall-clock seconds spent inside the capability.
    pub processing_time: Option<f64>,
}

/// Name-keyed table of inference capabilities.
#[derive(Default)]
pub struct InferenceRegistry {
    capabilities: HashMap<String, Arc<dyn InferenceCapability>>,
}

impl InferenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a name to a capability. The last registration for a name wins.
    pub fn register(&mut self, name: &str, capability: Arc<dyn InferenceCapability>) {
        self.capabilities.insert(name.to_string(), capability);
    }

    /// Names of all registered models, sorted.
    pub fn available_models(&self) -> Vec<String> {
        let mut names: Vec<String> = self.capabilities.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    /// Run every requested model that is registered against `frame`.
    ///
    /// Names not in the registry are silently skipped. A capability that
    /// returns `Err` or panics contributes no entry; the failure is logged
    /// and never propagates to the caller.
    pub fn run_all(&self, frame: &Frame, names: &[String]) -> BTreeMap<String, InferenceResult> {
        let mut results = BTreeMap::new();
        for name in names {
            let Some(capability) = self.capabilities.get(name) else {
                continue;
            };
            let started = Instant::now();
            match catch_unwind(AssertUnwindSafe(|| capability.run(frame))) {
                Ok(Ok(summary)) => {
                    results.insert(
                        name.clone(),
                        InferenceResult {
                            summary,
                            processing_time: Some(started.elapsed().as_secs_f64()),
                        },
                    );
                }
                Ok(Err(e)) => {
                    log::warn!("model '{}' failed: {}", name, e);
                }
                Err(_) => {
                    log::error!("model '{}' panicked; result dropped for this frame", name);
                }
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    struct FixedModel {
        key: &'static str,
    }

    impl InferenceCapability for FixedModel {
        fn run(&self, _frame: &Frame) -> Result<Summary> {
            let mut summary = Summary::new();
            summary.insert(self.key.to_string(), serde_json::json!(1));
            Ok(summary)
        }
    }

    struct FailingModel;

    impl InferenceCapability for FailingModel {
        fn run(&self, _frame: &Frame) -> Result<Summary> {
            Err(anyhow!("backend unavailable"))
        }
    }

    struct PanickingModel;

    impl InferenceCapability for PanickingModel {
        fn run(&self, _frame: &Frame) -> Result<Summary> {
            panic!("index out of bounds in kernel")
        }
    }

    fn test_frame() -> Frame {
        Frame::new(vec![128u8; 48], 4, 4)
    }

    #[test]
    fn unknown_names_are_silently_skipped() {
        let mut registry = InferenceRegistry::new();
        registry.register("asset_detection", Arc::new(FixedModel { key: "objects" }));

        let names = vec!["asset_detection".to_string(), "not_a_model".to_string()];
        let results = registry.run_all(&test_frame(), &names);

        assert_eq!(results.len(), 1);
        assert!(results.contains_key("asset_detection"));
        assert!(!results.contains_key("not_a_model"));
    }

    #[test]
    fn failing_capability_is_isolated() {
        let mut registry = InferenceRegistry::new();
        registry.register("bad", Arc::new(FailingModel));
        registry.register("good", Arc::new(FixedModel { key: "ok" }));

        let names = vec!["bad".to_string(), "good".to_string()];
        let results = registry.run_all(&test_frame(), &names);

        assert_eq!(results.len(), 1);
        assert!(results.contains_key("good"));
    }

    #[test]
    fn panicking_capability_is_isolated() {
        let mut registry = InferenceRegistry::new();
        registry.register("explodes", Arc::new(PanickingModel));
        registry.register("good", Arc::new(FixedModel { key: "ok" }));

        let names = vec!["explodes".to_string(), "good".to_string()];
        let results = registry.run_all(&test_frame(), &names);

        assert_eq!(results.len(), 1);
        assert!(results.contains_key("good"));
    }

    #[test]
    fn last_registration_wins() {
        let mut registry = InferenceRegistry::new();
        registry.register("model", Arc::new(FixedModel { key: "first" }));
        registry.register("model", Arc::new(FixedModel { key: "second" }));

        let results = registry.run_all(&test_frame(), &["model".to_string()]);
        let summary = &results["model"].summary;
        assert!(summary.contains_key("second"));
        assert!(!summary.contains_key("first"));
    }

    #[test]
    fn processing_time_is_recorded() {
        let mut registry = InferenceRegistry::new();
        registry.register("model", Arc::new(FixedModel { key: "ok" }));

        let results = registry.run_all(&test_frame(), &["model".to_string()]);
        let elapsed = results["model"].processing_time.unwrap();
        assert!(elapsed >= 0.0);
    }

    #[test]
    fn available_models_sorted() {
        let mut registry = InferenceRegistry::new();
        registry.register("b_model", Arc::new(FixedModel { key: "b" }));
        registry.register("a_model", Arc::new(FixedModel { key: "a" }));
        assert_eq!(registry.available_models(), vec!["a_model", "b_model"]);
    }
}
