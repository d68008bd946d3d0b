//! vitalstream: a streaming vital-signs store with rule-based patient alerting
//!
//! Measurements arrive as newline-delimited wire messages over TCP, are kept
//! in a concurrent per-patient store, and are periodically swept by pluggable
//! alert strategies (blood pressure, heart rate, oxygen saturation).

pub mod alerts;
pub mod config;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod storage;
pub mod timeseries;
pub mod vitals;

pub use alerts::{Alert, AlertCondition, AlertContext, AlertGenerator, AlertSink, AlertStrategy};
pub use config::{load_config, Config};
pub use error::{ConnectionError, MonitorError, ParseError, Result};
pub use ingest::{parse_message, IngestClient, IngestServer};
pub use storage::MeasurementStore;
pub use vitals::{Measurement, PatientId, VitalKind};
