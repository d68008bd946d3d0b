use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::strategy::{
    BloodPressureStrategy, HeartRateStrategy, OxygenSaturationStrategy,
};
use super::{Alert, AlertContext, AlertSink};
use crate::config::AlertConfig;
use crate::storage::MeasurementStore;
use crate::timeseries::MeasurementQuery;
use crate::vitals::PatientId;

/// Runs every bound detector over each patient's recent measurements.
///
/// For one patient the window is fetched once, sorted chronologically and
/// partitioned by vital kind; each context then sees only its own kind.
pub struct AlertGenerator {
    store: Arc<MeasurementStore>,
    contexts: Vec<AlertContext>,
    sink: Arc<dyn AlertSink>,
}

impl AlertGenerator {
    pub fn new(store: Arc<MeasurementStore>, sink: Arc<dyn AlertSink>) -> Self {
        AlertGenerator {
            store,
            contexts: Vec::new(),
            sink,
        }
    }

    /// Systolic, diastolic, heart-rate and saturation detectors.
    pub fn with_default_strategies(
        store: Arc<MeasurementStore>,
        config: &AlertConfig,
        sink: Arc<dyn AlertSink>,
    ) -> Self {
        AlertGenerator::new(store, sink)
            .with_context(AlertContext::new(BloodPressureStrategy::systolic(
                config.systolic.clone(),
            )))
            .with_context(AlertContext::new(BloodPressureStrategy::diastolic(
                config.diastolic.clone(),
            )))
            .with_context(AlertContext::new(HeartRateStrategy::new(
                config.heart_rate.clone(),
            )))
            .with_context(AlertContext::new(OxygenSaturationStrategy::new(
                config.saturation.clone(),
            )))
    }

    pub fn with_context(mut self, context: AlertContext) -> Self {
        self.contexts.push(context);
        self
    }

    pub fn contexts(&self) -> &[AlertContext] {
        &self.contexts
    }

    /// Evaluates one patient's `start..=end` window. Every alert is also
    /// forwarded to the sink.
    pub fn evaluate_patient(&self, patient_id: PatientId, start: i64, end: i64) -> Vec<Alert> {
        let partitions = MeasurementQuery::patient(patient_id)
            .between(start, end)
            .chronological()
            .execute_partitioned(&self.store);

        let alerts: Vec<Alert> = self
            .contexts
            .iter()
            .filter_map(|context| {
                let window = partitions
                    .get(&context.kind())
                    .map(Vec::as_slice)
                    .unwrap_or(&[]);
                context.run(patient_id, window)
            })
            .collect();

        for alert in &alerts {
            self.sink.emit(alert);
        }
        alerts
    }

    /// Evaluates every patient currently known to the store.
    pub fn evaluate_all(&self, start: i64, end: i64) -> Vec<Alert> {
        self.store
            .all_patients()
            .into_iter()
            .flat_map(|patient_id| self.evaluate_patient(patient_id, start, end))
            .collect()
    }

    /// Sweeps all patients every `interval` until `shutdown` is cancelled.
    ///
    /// With a `lookback_ms` the window is `[now - lookback, now]`, otherwise
    /// the whole history is evaluated.
    pub async fn run(
        self: Arc<Self>,
        interval: Duration,
        lookback_ms: Option<i64>,
        shutdown: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(interval);
        info!(?interval, ?lookback_ms, "alert evaluator started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let (start, end) = match lookback_ms {
                        Some(lookback) => {
                            let now = Utc::now().timestamp_millis();
                            (now.saturating_sub(lookback), now)
                        }
                        None => (i64::MIN, i64::MAX),
                    };
                    let alerts = self.evaluate_all(start, end);
                    debug!(raised = alerts.len(), patients = self.store.patient_count(), "sweep finished");
                }
            }
        }

        info!("alert evaluator stopped");
    }
}
