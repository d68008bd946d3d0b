use serde::{Deserialize, Serialize};
use std::fmt;

use super::{Alert, AlertCondition};
use crate::vitals::{Measurement, PatientId, VitalKind};

/// A stateless rule over a chronologically ordered window of one vital kind.
///
/// Implementations trust the window's ordering and never re-sort it. They
/// are total: empty or short windows simply produce no alert.
pub trait AlertStrategy: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// The vital kind whose readings this strategy consumes.
    fn kind(&self) -> VitalKind;

    /// Returns the first qualifying alert in the window, if any.
    fn evaluate(&self, patient_id: PatientId, window: &[Measurement]) -> Option<Alert>;
}

/// Threshold table for one blood-pressure channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BloodPressureThresholds {
    pub critical_high: f64,
    pub critical_low: f64,
    /// Minimum step between consecutive readings for a trend
    pub trend_delta: f64,
}

impl BloodPressureThresholds {
    pub fn systolic() -> Self {
        BloodPressureThresholds {
            critical_high: 180.0,
            critical_low: 90.0,
            trend_delta: 10.0,
        }
    }

    pub fn diastolic() -> Self {
        BloodPressureThresholds {
            critical_high: 120.0,
            critical_low: 60.0,
            trend_delta: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartRateThresholds {
    /// A reading above `spike_multiplier * mean(window)` is abnormal
    pub spike_multiplier: f64,
}

impl Default for HeartRateThresholds {
    fn default() -> Self {
        HeartRateThresholds {
            spike_multiplier: 1.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaturationThresholds {
    pub low_threshold: f64,
    pub rapid_drop_delta: f64,
    /// Two readings must be more than this far apart for a drop to count
    pub rapid_drop_interval_ms: i64,
}

impl Default for SaturationThresholds {
    fn default() -> Self {
        SaturationThresholds {
            low_threshold: 92.0,
            rapid_drop_delta: 5.0,
            rapid_drop_interval_ms: 600_000,
        }
    }
}

/// Trend and critical-threshold rules for one blood-pressure channel.
///
/// Readings are scanned in order. At index `i` the trend formed by readings
/// `i-3..=i` is checked first, then the thresholds for reading `i`. A trend is
/// three consecutive steps all strictly larger than `trend_delta` in the same
/// direction; it is reported at the fourth reading.
#[derive(Debug, Clone)]
pub struct BloodPressureStrategy {
    kind: VitalKind,
    thresholds: BloodPressureThresholds,
}

impl BloodPressureStrategy {
    pub fn systolic(thresholds: BloodPressureThresholds) -> Self {
        BloodPressureStrategy {
            kind: VitalKind::SystolicPressure,
            thresholds,
        }
    }

    pub fn diastolic(thresholds: BloodPressureThresholds) -> Self {
        BloodPressureStrategy {
            kind: VitalKind::DiastolicPressure,
            thresholds,
        }
    }

    fn trend_ending_at(&self, window: &[Measurement], i: usize) -> Option<AlertCondition> {
        let tuple = window.get(i.checked_sub(3)?..=i)?;
        let steps: Vec<f64> = tuple
            .windows(2)
            .map(|pair| pair[0].value() - pair[1].value())
            .collect();

        let delta = self.thresholds.trend_delta;
        if steps.iter().all(|step| *step > delta) {
            Some(AlertCondition::DecreasingTrend(self.kind.clone()))
        } else if steps.iter().all(|step| *step < -delta) {
            Some(AlertCondition::IncreasingTrend(self.kind.clone()))
        } else {
            None
        }
    }

    fn threshold_breach(&self, value: f64) -> Option<AlertCondition> {
        if value > self.thresholds.critical_high {
            Some(AlertCondition::CriticalHigh(self.kind.clone()))
        } else if value < self.thresholds.critical_low {
            Some(AlertCondition::CriticalLow(self.kind.clone()))
        } else {
            None
        }
    }
}

impl AlertStrategy for BloodPressureStrategy {
    fn name(&self) -> &'static str {
        match self.kind {
            VitalKind::DiastolicPressure => "diastolic-blood-pressure",
            _ => "systolic-blood-pressure",
        }
    }

    fn kind(&self) -> VitalKind {
        self.kind.clone()
    }

    fn evaluate(&self, patient_id: PatientId, window: &[Measurement]) -> Option<Alert> {
        window.iter().enumerate().find_map(|(i, reading)| {
            self.trend_ending_at(window, i)
                .or_else(|| self.threshold_breach(reading.value()))
                .map(|condition| Alert::new(patient_id, condition, reading.timestamp()))
        })
    }
}

/// Flags the first reading above a multiple of the window mean.
///
/// The mean includes the candidate reading itself, so one extreme outlier
/// raises its own threshold. With a multiplier of at least 1 a single-reading
/// window never alerts.
#[derive(Debug, Clone, Default)]
pub struct HeartRateStrategy {
    thresholds: HeartRateThresholds,
}

impl HeartRateStrategy {
    pub fn new(thresholds: HeartRateThresholds) -> Self {
        HeartRateStrategy { thresholds }
    }
}

impl AlertStrategy for HeartRateStrategy {
    fn name(&self) -> &'static str {
        "heart-rate"
    }

    fn kind(&self) -> VitalKind {
        VitalKind::HeartRate
    }

    fn evaluate(&self, patient_id: PatientId, window: &[Measurement]) -> Option<Alert> {
        if window.is_empty() {
            return None;
        }

        let mean = window.iter().map(Measurement::value).sum::<f64>() / window.len() as f64;
        let limit = self.thresholds.spike_multiplier * mean;

        window
            .iter()
            .find(|reading| reading.value() > limit)
            .map(|reading| {
                Alert::new(patient_id, AlertCondition::AbnormalHeartRate, reading.timestamp())
            })
    }
}

/// Rapid-drop and low-saturation rules.
///
/// At index `i` the drop between readings `i` and `i+1` is checked before the
/// low-value rule for reading `i`.
#[derive(Debug, Clone, Default)]
pub struct OxygenSaturationStrategy {
    thresholds: SaturationThresholds,
}

impl OxygenSaturationStrategy {
    pub fn new(thresholds: SaturationThresholds) -> Self {
        OxygenSaturationStrategy { thresholds }
    }
}

impl AlertStrategy for OxygenSaturationStrategy {
    fn name(&self) -> &'static str {
        "oxygen-saturation"
    }

    fn kind(&self) -> VitalKind {
        VitalKind::Saturation
    }

    fn evaluate(&self, patient_id: PatientId, window: &[Measurement]) -> Option<Alert> {
        let t = &self.thresholds;

        for (i, reading) in window.iter().enumerate() {
            if let Some(next) = window.get(i + 1) {
                let drop = reading.value() - next.value();
                let elapsed = next.timestamp().saturating_sub(reading.timestamp());
                if drop > t.rapid_drop_delta && elapsed > t.rapid_drop_interval_ms {
                    return Some(Alert::new(
                        patient_id,
                        AlertCondition::RapidSaturationDrop,
                        next.timestamp(),
                    ));
                }
            }

            if reading.value() < t.low_threshold {
                return Some(Alert::new(
                    patient_id,
                    AlertCondition::LowSaturation,
                    reading.timestamp(),
                ));
            }
        }

        None
    }
}
