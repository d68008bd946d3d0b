//! Alerting
//!
//! Detectors run over ordered measurement windows and produce at most one
//! [`Alert`] per run. Alerts are handed to an [`AlertSink`]; what the sink does
//! with them (console, file, network) is outside this crate.

pub mod context;
pub mod generator;
pub mod strategy;

pub use context::AlertContext;
pub use generator::AlertGenerator;
pub use strategy::{
    AlertStrategy, BloodPressureStrategy, HeartRateStrategy, OxygenSaturationStrategy,
};

use serde::Serialize;
use std::fmt;
use tokio::sync::mpsc;
use tracing::warn;

use crate::vitals::{PatientId, VitalKind};

/// What a detector found.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AlertCondition {
    IncreasingTrend(VitalKind),
    DecreasingTrend(VitalKind),
    CriticalHigh(VitalKind),
    CriticalLow(VitalKind),
    AbnormalHeartRate,
    RapidSaturationDrop,
    LowSaturation,
}

impl fmt::Display for AlertCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertCondition::IncreasingTrend(kind) => {
                write!(f, "Increasing trend in {}", kind.description())
            }
            AlertCondition::DecreasingTrend(kind) => {
                write!(f, "Decreasing trend in {}", kind.description())
            }
            AlertCondition::CriticalHigh(kind) => write!(f, "Critical high {}", kind.description()),
            AlertCondition::CriticalLow(kind) => write!(f, "Critical low {}", kind.description()),
            AlertCondition::AbnormalHeartRate => f.write_str("Abnormally high heart rate"),
            AlertCondition::RapidSaturationDrop => f.write_str("Rapid drop in oxygen saturation"),
            AlertCondition::LowSaturation => f.write_str("Low oxygen saturation"),
        }
    }
}

/// An alert raised for one patient at the timestamp of the triggering reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    patient_id: String,
    condition: AlertCondition,
    timestamp: i64,
}

impl Alert {
    pub fn new(patient_id: PatientId, condition: AlertCondition, timestamp: i64) -> Self {
        Alert {
            patient_id: patient_id.to_string(),
            condition,
            timestamp,
        }
    }

    pub fn patient_id(&self) -> &str {
        &self.patient_id
    }

    pub fn condition(&self) -> &AlertCondition {
        &self.condition
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// The flat `(patient id, description, timestamp)` triple sinks consume.
    pub fn to_triple(&self) -> (String, String, i64) {
        (
            self.patient_id.clone(),
            self.condition.to_string(),
            self.timestamp,
        )
    }
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Patient: {}; Condition: {}; Time: {}",
            self.patient_id, self.condition, self.timestamp
        )
    }
}

/// Consumer of produced alerts.
pub trait AlertSink: Send + Sync {
    fn emit(&self, alert: &Alert);
}

impl<F> AlertSink for F
where
    F: Fn(&Alert) + Send + Sync,
{
    fn emit(&self, alert: &Alert) {
        self(alert)
    }
}

/// Writes every alert to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl AlertSink for LogSink {
    fn emit(&self, alert: &Alert) {
        let (patient_id, condition, timestamp) = alert.to_triple();
        warn!(%patient_id, %condition, timestamp, "alert raised");
    }
}

/// Forwards alerts into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Alert>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Alert>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelSink { tx }, rx)
    }
}

impl AlertSink for ChannelSink {
    fn emit(&self, alert: &Alert) {
        if self.tx.send(alert.clone()).is_err() {
            warn!(%alert, "alert receiver dropped, alert discarded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    #[test]
    fn test_condition_descriptions() {
        assert_eq!(
            AlertCondition::DecreasingTrend(VitalKind::SystolicPressure).to_string(),
            "Decreasing trend in systolic blood pressure"
        );
        assert_eq!(
            AlertCondition::CriticalLow(VitalKind::DiastolicPressure).to_string(),
            "Critical low diastolic blood pressure"
        );
        assert_eq!(AlertCondition::LowSaturation.to_string(), "Low oxygen saturation");
    }

    #[test]
    fn test_alert_triple() {
        let alert = Alert::new(12, AlertCondition::AbnormalHeartRate, 5000);
        assert_eq!(
            alert.to_triple(),
            ("12".to_string(), "Abnormally high heart rate".to_string(), 5000)
        );
        assert_eq!(
            alert.to_string(),
            "Patient: 12; Condition: Abnormally high heart rate; Time: 5000"
        );
    }

    #[test]
    fn test_closure_sink() {
        let seen = Mutex::new(Vec::new());
        let sink = |alert: &Alert| seen.lock().unwrap().push(alert.timestamp());
        sink.emit(&Alert::new(1, AlertCondition::LowSaturation, 10));
        sink.emit(&Alert::new(1, AlertCondition::LowSaturation, 20));
        assert_eq!(*seen.lock().unwrap(), vec![10, 20]);
    }

    #[derive(Clone, Default)]
    struct CapturedLog(std::sync::Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_log_sink_writes_triple_fields() {
        let log = CapturedLog::default();
        let writer = log.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            LogSink.emit(&Alert::new(4, AlertCondition::LowSaturation, 1000));
        });

        let output = String::from_utf8(log.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("alert raised"));
        assert!(output.contains("patient_id=4"));
        assert!(output.contains("condition=Low oxygen saturation"));
        assert!(output.contains("timestamp=1000"));
    }

    #[tokio::test]
    async fn test_channel_sink_forwards() {
        let (sink, mut rx) = ChannelSink::new();
        sink.emit(&Alert::new(4, AlertCondition::RapidSaturationDrop, 99));
        let alert = rx.recv().await.unwrap();
        assert_eq!(alert.patient_id(), "4");
        assert_eq!(alert.condition(), &AlertCondition::RapidSaturationDrop);
    }
}
