//! SLA predictor: breach-probability estimate from historical mean/variance
//! under a normal model, with a cold-start ratio fallback.
//!
//! Grounded on the original `sla_predictor.py`. The normal CDF is computed
//! via `statrs` rather than a hand-rolled `erf`, per this pack's statistical
//! crate of choice.

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

use crate::audit::{AuditEntry, AuditLog, Op, Outcome};
use crate::domain::now_iso;
use crate::learning::Historical;

const MIN_DATA_POINTS: u64 = 3;
const COMPONENT_SRC: &str = "sla_predictor";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    OnTrack,
    Monitor,
    AtRisk,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaPrediction {
    pub task_id: String,
    pub task_type: String,
    pub elapsed_minutes: f64,
    pub predicted_duration_minutes: f64,
    pub sla_threshold_minutes: f64,
    pub probability: f64,
    pub exceeds_alert_threshold: bool,
    pub recommendation: Recommendation,
    pub predicted_at: String,
}

pub struct SlaPredictor {
    alert_threshold: f64,
}

impl SlaPredictor {
    pub fn new(alert_threshold: f64) -> Self {
        Self { alert_threshold }
    }

    pub fn predict(
        &self,
        task_id: &str,
        task_type: &str,
        elapsed_minutes: f64,
        sla_minutes: f64,
        historical: Option<&Historical>,
        audit: &AuditLog,
    ) -> SlaPrediction {
        let (predicted_duration, probability) = if elapsed_minutes >= sla_minutes {
            (elapsed_minutes, 1.0)
        } else if let Some(h) = historical.filter(|h| h.total_count >= MIN_DATA_POINTS) {
            self.predict_statistical(elapsed_minutes, sla_minutes, h)
        } else {
            let ratio = if sla_minutes > 0.0 { elapsed_minutes / sla_minutes } else { 0.0 };
            (sla_minutes, ratio.clamp(0.0, 1.0))
        };

        let probability = probability.clamp(0.0, 1.0);
        let recommendation = if probability < 0.3 {
            Recommendation::OnTrack
        } else if probability <= 0.7 {
            Recommendation::Monitor
        } else {
            Recommendation::AtRisk
        };
        let exceeds_alert_threshold = probability > self.alert_threshold;

        let prediction = SlaPrediction {
            task_id: task_id.to_string(),
            task_type: task_type.to_string(),
            elapsed_minutes,
            predicted_duration_minutes: predicted_duration,
            sla_threshold_minutes: sla_minutes,
            probability,
            exceeds_alert_threshold,
            recommendation,
            predicted_at: now_iso(),
        };

        let outcome = if exceeds_alert_threshold { Outcome::Flagged } else { Outcome::Success };
        audit.append(
            &AuditEntry::new(Op::SlaPrediction, task_id, COMPONENT_SRC, outcome).with_detail(format!(
                "probability={:.3} recommendation={:?} task_type={} elapsed={:.1}min threshold={:.1}min",
                prediction.probability, prediction.recommendation, task_type, elapsed_minutes, sla_minutes
            )),
        );

        prediction
    }

    fn predict_statistical(&self, elapsed: f64, sla: f64, h: &Historical) -> (f64, f64) {
        let mean_min = h.mean_duration_ms / 60_000.0;
        let stdev_min = h.variance_duration_ms2.max(0.0).sqrt() / 60_000.0;

        if stdev_min == 0.0 {
            let probability = if mean_min >= sla { 1.0 } else { 0.0 };
            return (mean_min, probability);
        }

        let z = (sla - elapsed) / stdev_min;
        let probability = match Normal::new(0.0, 1.0) {
            Ok(normal) => 1.0 - normal.cdf(z),
            Err(_) => 0.0,
        };
        (mean_min, probability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn log() -> AuditLog {
        let dir = tempdir().unwrap();
        AuditLog::open(dir.path().join("audit.jsonl")).unwrap()
    }

    #[test]
    fn already_elapsed_past_sla_is_certain_breach() {
        let predictor = SlaPredictor::new(0.7);
        let audit = log();
        let prediction = predictor.predict("t1", "document", 12.0, 10.0, None, &audit);
        assert_eq!(prediction.probability, 1.0);
        assert_eq!(prediction.recommendation, Recommendation::AtRisk);
    }

    #[test]
    fn cold_start_uses_elapsed_over_sla_ratio() {
        let predictor = SlaPredictor::new(0.7);
        let audit = log();
        let prediction = predictor.predict("t1", "document", 3.0, 10.0, None, &audit);
        assert!((prediction.probability - 0.3).abs() < 1e-9);
    }

    #[test]
    fn statistical_prediction_within_bounds_and_flagged() {
        let predictor = SlaPredictor::new(0.7);
        let audit = log();
        let historical = Historical {
            total_count: 10,
            failure_rate: 0.0,
            mean_duration_ms: 480_000.0,
            variance_duration_ms2: 3.6e9,
        };
        let prediction = predictor.predict("t1", "document", 7.0, 10.0, Some(&historical), &audit);
        assert!(prediction.probability > 0.0 && prediction.probability < 1.0);

        let entries = audit.tail(1);
        assert_eq!(entries[0].op, Op::SlaPrediction);
    }

    #[test]
    fn zero_variance_is_deterministic() {
        let predictor = SlaPredictor::new(0.7);
        let audit = log();
        let below = Historical {
            total_count: 5,
            failure_rate: 0.0,
            mean_duration_ms: 60_000.0,
            variance_duration_ms2: 0.0,
        };
        let prediction = predictor.predict("t1", "document", 0.5, 10.0, Some(&below), &audit);
        assert_eq!(prediction.probability, 0.0);

        let above = Historical {
            total_count: 5,
            failure_rate: 0.0,
            mean_duration_ms: 900_000.0,
            variance_duration_ms2: 0.0,
        };
        let prediction = predictor.predict("t2", "document", 0.5, 10.0, Some(&above), &audit);
        assert_eq!(prediction.probability, 1.0);
    }

    use proptest::prelude::*;

    proptest! {
        /// Whatever the inputs, a breach probability is always a valid
        /// probability, across cold-start, statistical, and certain-breach
        /// branches alike.
        #[test]
        fn probability_always_stays_in_unit_interval(
            elapsed in 0.0f64..120.0,
            sla in 1.0f64..120.0,
            has_history in any::<bool>(),
            mean_ms in 1_000.0f64..1_000_000.0,
            variance_ms2 in 0.0f64..1.0e10,
        ) {
            let predictor = SlaPredictor::new(0.7);
            let audit = log();
            let historical = has_history.then(|| Historical {
                total_count: 10,
                failure_rate: 0.0,
                mean_duration_ms: mean_ms,
                variance_duration_ms2: variance_ms2,
            });
            let prediction = predictor.predict("t1", "document", elapsed, sla, historical.as_ref(), &audit);
            prop_assert!((0.0..=1.0).contains(&prediction.probability));
        }
    }
}
