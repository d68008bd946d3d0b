use std::collections::HashSet;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::vitals::{Measurement, PatientId, VitalKind};

/// Ordered measurements of one patient, guarded by their own lock.
///
/// Records are kept in insertion order. Two records with the same
/// `(kind, timestamp)` never coexist; the second append is a no-op.
#[derive(Debug)]
pub struct PatientSeries {
    patient_id: PatientId,
    data: RwLock<SeriesData>,
}

#[derive(Debug, Default)]
struct SeriesData {
    records: Vec<Measurement>,
    // (kind, timestamp) pairs already stored
    seen: HashSet<(VitalKind, i64)>,
}

impl PatientSeries {
    pub fn new(patient_id: PatientId) -> Self {
        PatientSeries {
            patient_id,
            data: RwLock::new(SeriesData::default()),
        }
    }

    pub fn patient_id(&self) -> PatientId {
        self.patient_id
    }

    /// Appends a reading unless one with the same kind and timestamp exists.
    /// Returns `true` when the reading was stored.
    pub fn append(&self, kind: VitalKind, value: f64, timestamp: i64) -> bool {
        let mut data = self.write();
        if !data.seen.insert((kind.clone(), timestamp)) {
            return false;
        }
        data.records
            .push(Measurement::new(self.patient_id, kind, value, timestamp));
        true
    }

    /// Snapshot of every record with `start <= timestamp <= end`, in insertion order.
    pub fn get_range(&self, start: i64, end: i64) -> Vec<Measurement> {
        self.read()
            .records
            .iter()
            .filter(|r| r.timestamp() >= start && r.timestamp() <= end)
            .cloned()
            .collect()
    }

    /// Snapshot of the whole series, in insertion order.
    pub fn records(&self) -> Vec<Measurement> {
        self.read().records.clone()
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Every mutation is a single push + set insert, so a panicking holder
    // cannot leave the data half-written; poisoning is safe to ignore.
    fn read(&self) -> RwLockReadGuard<'_, SeriesData> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SeriesData> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }
}
