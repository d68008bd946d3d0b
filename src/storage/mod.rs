//! Core storage engine
//!
//! Holds every patient's measurements in memory:
//! - a store-level lock guarding the patient -> series map
//! - a per-series lock guarding that patient's appends and reads
//!
//! Operations on different patients never contend on a series lock. The
//! map's write lock is taken only the first time a patient id is seen.

mod series;
pub use series::PatientSeries;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::vitals::{Measurement, PatientId, VitalKind};

#[derive(Debug, Default)]
pub struct MeasurementStore {
    patients: RwLock<HashMap<PatientId, Arc<PatientSeries>>>,
}

impl MeasurementStore {
    pub fn new() -> Self {
        MeasurementStore::default()
    }

    /// Stores a reading. A repeated `(patient_id, kind, timestamp)` is a no-op.
    ///
    /// Returns `true` when a new record was stored.
    pub fn append(&self, patient_id: PatientId, value: f64, kind: VitalKind, timestamp: i64) -> bool {
        let series = self.series_or_create(patient_id);
        let stored = series.append(kind, value, timestamp);
        if !stored {
            debug!(patient_id, timestamp, "duplicate measurement ignored");
        }
        stored
    }

    /// Records for `patient_id` with `start <= timestamp <= end`, in insertion order.
    ///
    /// Unknown patients yield an empty result.
    pub fn query(&self, patient_id: PatientId, start: i64, end: i64) -> Vec<Measurement> {
        match self.series(patient_id) {
            Some(series) => series.get_range(start, end),
            None => Vec::new(),
        }
    }

    /// Like [`query`](Self::query), narrowed to one vital kind.
    pub fn query_kind(
        &self,
        patient_id: PatientId,
        kind: &VitalKind,
        start: i64,
        end: i64,
    ) -> Vec<Measurement> {
        filter_by_kind(kind, &self.query(patient_id, start, end))
    }

    /// Like [`query`](Self::query), sorted by timestamp. Records sharing a
    /// timestamp keep their insertion order.
    pub fn query_ordered(&self, patient_id: PatientId, start: i64, end: i64) -> Vec<Measurement> {
        let mut records = self.query(patient_id, start, end);
        records.sort_by_key(Measurement::timestamp);
        records
    }

    /// Snapshot of the currently known patient ids, ascending.
    pub fn all_patients(&self) -> Vec<PatientId> {
        let patients = self.patients.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<PatientId> = patients.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn patient_count(&self) -> usize {
        self.patients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Total number of stored measurements across all patients.
    pub fn len(&self) -> usize {
        let patients = self.patients.read().unwrap_or_else(PoisonError::into_inner);
        patients.values().map(|series| series.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn series(&self, patient_id: PatientId) -> Option<Arc<PatientSeries>> {
        self.patients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&patient_id)
            .cloned()
    }

    fn series_or_create(&self, patient_id: PatientId) -> Arc<PatientSeries> {
        if let Some(series) = self.series(patient_id) {
            return series;
        }

        // Another writer may have created it between the two locks.
        let mut patients = self.patients.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            patients
                .entry(patient_id)
                .or_insert_with(|| Arc::new(PatientSeries::new(patient_id))),
        )
    }
}

/// Keeps only the records of `kind` (exact match), preserving order.
pub fn filter_by_kind(kind: &VitalKind, records: &[Measurement]) -> Vec<Measurement> {
    records
        .iter()
        .filter(|r| r.kind() == kind)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::thread;

    #[test]
    fn test_basic_operations() {
        let store = MeasurementStore::new();
        assert!(store.append(1, 42.0, VitalKind::HeartRate, 1000));

        let records = store.query(1, 0, 2000);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value(), 42.0);
        assert_eq!(records[0].patient_id(), 1);
    }

    #[test]
    fn test_append_is_idempotent() {
        let store = MeasurementStore::new();
        assert!(store.append(5, 120.0, VitalKind::SystolicPressure, 1000));
        assert!(!store.append(5, 120.0, VitalKind::SystolicPressure, 1000));
        assert!(!store.append(5, 150.0, VitalKind::SystolicPressure, 1000));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_query_bounds_and_unknown_patient() {
        let store = MeasurementStore::new();
        for ts in [10, 20, 30, 40, 50] {
            store.append(2, ts as f64, VitalKind::HeartRate, ts);
        }

        let records = store.query(2, 20, 40);
        assert!(records.iter().all(|r| (20..=40).contains(&r.timestamp())));
        assert_eq!(records.len(), 3);

        assert!(store.query(99, 0, i64::MAX).is_empty());
        assert!(store.query(2, 40, 20).is_empty());
    }

    #[test]
    fn test_query_kind_and_filter() {
        let store = MeasurementStore::new();
        store.append(1, 120.0, VitalKind::SystolicPressure, 1);
        store.append(1, 80.0, VitalKind::DiastolicPressure, 1);
        store.append(1, 72.0, VitalKind::HeartRate, 2);

        let systolic = store.query_kind(1, &VitalKind::SystolicPressure, 0, 10);
        assert_eq!(systolic.len(), 1);
        assert_eq!(systolic[0].value(), 120.0);

        let all = store.query(1, 0, 10);
        let heart = filter_by_kind(&VitalKind::HeartRate, &all);
        assert_eq!(heart.len(), 1);
        assert_eq!(heart[0].timestamp(), 2);
    }

    #[test]
    fn test_query_ordered_sorts_by_timestamp() {
        let store = MeasurementStore::new();
        store.append(1, 3.0, VitalKind::HeartRate, 300);
        store.append(1, 1.0, VitalKind::HeartRate, 100);
        store.append(1, 2.0, VitalKind::HeartRate, 200);

        let insertion: Vec<i64> = store.query(1, 0, 1000).iter().map(|r| r.timestamp()).collect();
        assert_eq!(insertion, vec![300, 100, 200]);

        let ordered: Vec<i64> = store
            .query_ordered(1, 0, 1000)
            .iter()
            .map(|r| r.timestamp())
            .collect();
        assert_eq!(ordered, vec![100, 200, 300]);
    }

    #[test]
    fn test_all_patients_snapshot() {
        let store = MeasurementStore::new();
        store.append(3, 1.0, VitalKind::HeartRate, 1);
        store.append(1, 1.0, VitalKind::HeartRate, 1);
        store.append(3, 1.0, VitalKind::HeartRate, 2);
        assert_eq!(store.all_patients(), vec![1, 3]);
        assert_eq!(store.patient_count(), 2);
    }

    #[test]
    fn test_concurrent_appends_distinct_patients() {
        let store = Arc::new(MeasurementStore::new());
        let handles: Vec<_> = (0..16u32)
            .map(|patient| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for ts in 0..250 {
                        store.append(patient, ts as f64, VitalKind::HeartRate, ts);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.patient_count(), 16);
        for patient in 0..16u32 {
            let records = store.query_ordered(patient, 0, 1000);
            assert_eq!(records.len(), 250);
            for (i, record) in records.iter().enumerate() {
                assert_eq!(record.patient_id(), patient);
                assert_eq!(record.timestamp(), i as i64);
                assert_eq!(record.value(), i as f64);
            }
        }
    }

    #[test]
    fn test_concurrent_duplicate_appends_store_one() {
        let store = Arc::new(MeasurementStore::new());
        let handles: Vec<_> = (0..32)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || store.append(7, i as f64, VitalKind::Saturation, 5000))
            })
            .collect();
        let stored = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|stored| *stored)
            .count();

        assert_eq!(stored, 1);
        assert_eq!(store.query(7, 5000, 5000).len(), 1);
    }
}
