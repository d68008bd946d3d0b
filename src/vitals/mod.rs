//! Vital-sign measurement types
//!
//! This module contains the value types that flow through the store, the
//! detectors and the ingestion channel.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ParseError;

/// Identifier of a monitored patient.
pub type PatientId = u32;

/// Standard vital sign types carried on the wire
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VitalKind {
    SystolicPressure,  // mmHg
    DiastolicPressure, // mmHg
    HeartRate,         // beats per minute
    Saturation,        // SpO2 as percentage
    /// Any other label, kept verbatim (e.g. "Cholesterol", "ECG")
    Other(String),
}

impl VitalKind {
    /// Canonical wire label.
    pub fn label(&self) -> &str {
        match self {
            VitalKind::SystolicPressure => "SystolicPressure",
            VitalKind::DiastolicPressure => "DiastolicPressure",
            VitalKind::HeartRate => "HeartRate",
            VitalKind::Saturation => "Saturation",
            VitalKind::Other(label) => label,
        }
    }

    /// Human-readable name used in alert descriptions.
    pub fn description(&self) -> &str {
        match self {
            VitalKind::SystolicPressure => "systolic blood pressure",
            VitalKind::DiastolicPressure => "diastolic blood pressure",
            VitalKind::HeartRate => "heart rate",
            VitalKind::Saturation => "oxygen saturation",
            VitalKind::Other(label) => label,
        }
    }
}

impl fmt::Display for VitalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for VitalKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        if raw.is_empty() {
            return Err(ParseError::EmptyKind);
        }

        let normalized: String = raw
            .chars()
            .filter(|c| !matches!(c, ' ' | '_' | '-'))
            .flat_map(char::to_lowercase)
            .collect();

        let kind = match normalized.as_str() {
            "systolicpressure" | "systolicbp" | "systolic" => VitalKind::SystolicPressure,
            "diastolicpressure" | "diastolicbp" | "diastolic" => VitalKind::DiastolicPressure,
            "heartrate" | "hr" | "pulse" => VitalKind::HeartRate,
            "saturation" | "oxygensaturation" | "bloodsaturation" | "spo2" => {
                VitalKind::Saturation
            }
            _ => VitalKind::Other(raw.to_string()),
        };
        Ok(kind)
    }
}

/// One timestamped vital-sign reading. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    patient_id: PatientId,
    kind: VitalKind,
    value: f64,
    timestamp: i64, // milliseconds since the Unix epoch
}

impl Measurement {
    pub fn new(patient_id: PatientId, kind: VitalKind, value: f64, timestamp: i64) -> Self {
        Measurement {
            patient_id,
            kind,
            value,
            timestamp,
        }
    }

    pub fn patient_id(&self) -> PatientId {
        self.patient_id
    }

    pub fn kind(&self) -> &VitalKind {
        &self.kind
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Renders the measurement in the ingestion wire format.
    pub fn to_wire(&self) -> String {
        format!(
            "{},{},{},{}",
            self.patient_id, self.timestamp, self.kind, self.value
        )
    }
}
