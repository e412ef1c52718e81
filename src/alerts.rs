//! Threshold-based alert rules.
//!
//! A fixed table maps model names to predicates over that model's summary.
//! Evaluation is a pure function of an immutable summary: a rule that finds
//! its fields missing or mistyped simply produces no alert, and one model's
//! rule cannot affect another's. The worker evaluates rules once per
//! produced result and hands any alert to the sink; the kernel never
//! mutates an alert after creation (resolution belongs to the sink/API).

use serde::{Deserialize, Serialize};

use crate::Summary;

/// Alert severity, ordered low < medium < high < critical.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Option<Severity> {
        match value {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A derived event raised when a model's output crosses a threshold.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    /// Sink-assigned identifier; `None` until persisted.
    pub id: Option<i64>,
    pub stream_id: String,
    #[serde(rename = "type")]
    pub alert_type: String,
    pub message: String,
    pub severity: Severity,
    pub resolved: bool,
    pub created_at: f64,
    pub resolved_at: Option<f64>,
}

impl Alert {
    fn new(
        stream_id: &str,
        alert_type: &str,
        message: String,
        severity: Severity,
        created_at: f64,
    ) -> Alert {
        Alert {
            id: None,
            stream_id: stream_id.to_string(),
            alert_type: alert_type.to_string(),
            message,
            severity,
            resolved: false,
            created_at,
            resolved_at: None,
        }
    }
}

type RuleFn = fn(&Summary) -> Option<(&'static str, String, Severity)>;

/// The rule table, keyed by model name.
const RULES: &[(&str, RuleFn)] = &[
    ("defect_analysis", defect_rule),
    ("asset_detection", asset_rule),
    ("road_condition", road_condition_rule),
    ("traffic_analysis", traffic_rule),
];

/// Evaluate the rule for `model` against its summary.
///
/// Returns zero or one alert, stamped with `ts` (the capture timestamp of
/// the frame that produced the summary, so an alert never predates its own
/// result). Models without a rule, and summaries that do not satisfy their
/// rule's predicate, produce `None`.
pub fn evaluate(stream_id: &str, model: &str, summary: &Summary, ts: f64) -> Option<Alert> {
    let rule = RULES
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, rule)| rule)?;
    let (alert_type, message, severity) = rule(summary)?;
    Some(Alert::new(stream_id, alert_type, message, severity, ts))
}

fn defect_rule(summary: &Summary) -> Option<(&'static str, String, Severity)> {
    let score = summary.get("defect_score")?.as_f64()?;
    if score > 0.7 {
        Some((
            "high_defect",
            format!("High defect score detected: {}", score),
            Severity::High,
        ))
    } else {
        None
    }
}

fn asset_rule(summary: &Summary) -> Option<(&'static str, String, Severity)> {
    let objects = summary.get("objects")?.as_i64()?;
    if objects > 50 {
        Some((
            "high_object_count",
            format!("High number of objects detected: {}", objects),
            Severity::Medium,
        ))
    } else {
        None
    }
}

fn road_condition_rule(summary: &Summary) -> Option<(&'static str, String, Severity)> {
    let condition = summary.get("condition")?.as_str()?;
    let severity = match condition {
        "critical" => Severity::High,
        "poor" => Severity::Medium,
        _ => return None,
    };
    Some((
        "poor_road_condition",
        format!("Degraded road condition detected: {}", condition),
        severity,
    ))
}

fn traffic_rule(summary: &Summary) -> Option<(&'static str, String, Severity)> {
    let congestion = summary.get("congestion_level")?.as_f64()?;
    if congestion > 0.8 {
        Some((
            "high_congestion",
            format!("High congestion level detected: {}", congestion),
            Severity::Medium,
        ))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn summary(pairs: &[(&str, serde_json::Value)]) -> Summary {
        let mut map = Summary::new();
        for (key, value) in pairs {
            map.insert(key.to_string(), value.clone());
        }
        map
    }

    #[test]
    fn severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn severity_round_trips_through_strings() {
        for severity in [
            Severity::Low,
            Severity::Medium,
            Severity::High,
            Severity::Critical,
        ] {
            assert_eq!(Severity::parse(severity.as_str()), Some(severity));
        }
        assert_eq!(Severity::parse("urgent"), None);
    }

    const TS: f64 = 1_700_000_000.0;

    #[test]
    fn defect_score_above_threshold_raises_high() {
        let alert = evaluate(
            "s1",
            "defect_analysis",
            &summary(&[("defect_score", json!(0.75))]),
            TS,
        )
        .expect("alert");
        assert_eq!(alert.severity, Severity::High);
        assert_eq!(alert.alert_type, "high_defect");
        assert!(!alert.resolved);
    }

    #[test]
    fn defect_score_below_threshold_is_quiet() {
        let alert = evaluate(
            "s1",
            "defect_analysis",
            &summary(&[("defect_score", json!(0.65))]),
            TS,
        );
        assert!(alert.is_none());
    }

    #[test]
    fn alert_carries_the_capture_timestamp() {
        let alert = evaluate(
            "s1",
            "defect_analysis",
            &summary(&[("defect_score", json!(0.9))]),
            TS,
        )
        .expect("alert");
        assert_eq!(alert.created_at, TS);
    }

    #[test]
    fn object_count_rule() {
        assert!(
            evaluate("s1", "asset_detection", &summary(&[("objects", json!(51))]), TS).is_some()
        );
        assert!(
            evaluate("s1", "asset_detection", &summary(&[("objects", json!(50))]), TS).is_none()
        );
    }

    #[test]
    fn road_condition_severity_depends_on_class() {
        let critical = evaluate(
            "s1",
            "road_condition",
            &summary(&[("condition", json!("critical"))]),
            TS,
        )
        .expect("alert");
        assert_eq!(critical.severity, Severity::High);

        let poor = evaluate(
            "s1",
            "road_condition",
            &summary(&[("condition", json!("poor"))]),
            TS,
        )
        .expect("alert");
        assert_eq!(poor.severity, Severity::Medium);

        assert!(evaluate(
            "s1",
            "road_condition",
            &summary(&[("condition", json!("good"))]),
            TS
        )
        .is_none());
    }

    #[test]
    fn congestion_rule() {
        let alert = evaluate(
            "s1",
            "traffic_analysis",
            &summary(&[("congestion_level", json!(0.85))]),
            TS,
        )
        .expect("alert");
        assert_eq!(alert.severity, Severity::Medium);
        assert!(evaluate(
            "s1",
            "traffic_analysis",
            &summary(&[("congestion_level", json!(0.5))]),
            TS
        )
        .is_none());
    }

    #[test]
    fn unknown_models_and_malformed_summaries_are_quiet() {
        assert!(evaluate("s1", "face_recognition", &Summary::new(), TS).is_none());
        // Mistyped field: the rule finds no usable number and stays quiet.
        assert!(evaluate(
            "s1",
            "defect_analysis",
            &summary(&[("defect_score", json!("very bad"))]),
            TS
        )
        .is_none());
        assert!(evaluate("s1", "defect_analysis", &Summary::new(), TS).is_none());
    }
}
