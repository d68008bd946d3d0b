//! Time-series access
//!
//! Window selection over the measurement store:
//! - Inclusive time-range queries
//! - Kind narrowing
//! - Explicit result ordering (insertion or chronological)

pub mod query;

pub use query::{MeasurementQuery, ResultOrder};
