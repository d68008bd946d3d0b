//! Real-time ingestion
//!
//! Wire format: one UTF-8 line per message,
//! `<patientId>,<timestamp_ms>,<kind>,<value>`, no trailing delimiter.
//!
//! - [`server`]: accepts peers, stores their messages and rebroadcasts them
//! - [`client`]: one outbound connection that stores what it receives and reconnects
//! - [`file`]: loads generator output files into the store

pub mod client;
pub mod codec;
pub mod file;
pub mod server;

pub use client::{ConnectionEvent, IngestClient, RetryPolicy};
pub use codec::{WireCodec, WireFrame};
pub use file::{FileDataReader, LoadSummary};
pub use server::{BroadcastReport, IngestServer, PeerRegistry};

use crate::error::ParseError;
use crate::storage::MeasurementStore;
use crate::vitals::{Measurement, PatientId, VitalKind};

/// Parses one wire message.
///
/// Fields are trimmed. The value may carry a trailing `%`, as saturation
/// readings do. Non-finite values are rejected.
pub fn parse_message(message: &str) -> Result<Measurement, ParseError> {
    let fields: Vec<&str> = message.split(',').map(str::trim).collect();
    let &[patient_id, timestamp, kind, value] = fields.as_slice() else {
        return Err(ParseError::FieldCount {
            found: fields.len(),
        });
    };

    let patient_id = parse_patient_id(patient_id)?;
    let timestamp = parse_timestamp(timestamp)?;
    let kind = kind.parse::<VitalKind>()?;
    let value = parse_value(value)?;

    Ok(Measurement::new(patient_id, kind, value, timestamp))
}

/// Parses `message` and appends it to `store`.
///
/// Returns the measurement and whether it was new (duplicates are dropped by
/// the store).
pub fn ingest_line(store: &MeasurementStore, message: &str) -> Result<(Measurement, bool), ParseError> {
    let measurement = parse_message(message)?;
    let stored = store.append(
        measurement.patient_id(),
        measurement.value(),
        measurement.kind().clone(),
        measurement.timestamp(),
    );
    Ok((measurement, stored))
}

pub(crate) fn parse_patient_id(raw: &str) -> Result<PatientId, ParseError> {
    raw.parse()
        .map_err(|_| ParseError::PatientId(raw.to_string()))
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<i64, ParseError> {
    raw.parse()
        .map_err(|_| ParseError::Timestamp(raw.to_string()))
}

pub(crate) fn parse_value(raw: &str) -> Result<f64, ParseError> {
    let number = raw.strip_suffix('%').unwrap_or(raw).trim_end();
    match number.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(ParseError::Value(raw.to_string())),
    }
}
