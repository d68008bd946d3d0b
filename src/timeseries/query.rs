use std::collections::BTreeMap;

use crate::storage::{filter_by_kind, MeasurementStore};
use crate::vitals::{Measurement, PatientId, VitalKind};

/// How query results are ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultOrder {
    /// The series' insertion order (the store's native order).
    #[default]
    Insertion,
    /// Ascending timestamp; ties keep insertion order.
    Chronological,
}

/// A window over one patient's measurements.
#[derive(Debug, Clone)]
pub struct MeasurementQuery {
    pub patient_id: PatientId,
    pub start_time: i64,
    pub end_time: i64,
    pub kind: Option<VitalKind>,
    pub order: ResultOrder,
}

impl MeasurementQuery {
    /// Everything recorded for `patient_id`, in insertion order.
    pub fn patient(patient_id: PatientId) -> Self {
        MeasurementQuery {
            patient_id,
            start_time: i64::MIN,
            end_time: i64::MAX,
            kind: None,
            order: ResultOrder::Insertion,
        }
    }

    /// Restricts the window to `start..=end`.
    pub fn between(mut self, start: i64, end: i64) -> Self {
        self.start_time = start;
        self.end_time = end;
        self
    }

    pub fn kind(mut self, kind: VitalKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn chronological(mut self) -> Self {
        self.order = ResultOrder::Chronological;
        self
    }

    pub fn execute(&self, store: &MeasurementStore) -> Vec<Measurement> {
        let records = match self.order {
            ResultOrder::Insertion => store.query(self.patient_id, self.start_time, self.end_time),
            ResultOrder::Chronological => {
                store.query_ordered(self.patient_id, self.start_time, self.end_time)
            }
        };

        match &self.kind {
            Some(kind) => filter_by_kind(kind, &records),
            None => records,
        }
    }

    /// Runs the query and splits the result by vital kind. Each partition
    /// keeps the query's ordering.
    pub fn execute_partitioned(&self, store: &MeasurementStore) -> BTreeMap<VitalKind, Vec<Measurement>> {
        let mut partitions: BTreeMap<VitalKind, Vec<Measurement>> = BTreeMap::new();
        for record in self.execute(store) {
            partitions
                .entry(record.kind().clone())
                .or_default()
                .push(record);
        }
        partitions
    }
}
