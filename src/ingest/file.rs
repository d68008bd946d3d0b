use std::fs;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::{parse_patient_id, parse_timestamp, parse_value};
use crate::error::{ParseError, Result};
use crate::storage::MeasurementStore;
use crate::vitals::{Measurement, VitalKind};

/// Counts from one directory load.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadSummary {
    pub files: usize,
    pub stored: usize,
    pub duplicates: usize,
    pub skipped: usize,
}

/// Loads record files written by the data generator into a store.
///
/// Every `*.txt` file in the directory is read line by line; each line looks
/// like `Patient ID: 1, Timestamp: 1714376789050, Label: HeartRate, Data: 85.0`.
#[derive(Debug, Clone)]
pub struct FileDataReader {
    directory: PathBuf,
}

impl FileDataReader {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        FileDataReader {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn read_into(&self, store: &MeasurementStore) -> Result<LoadSummary> {
        if !self.directory.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("invalid output directory: {}", self.directory.display()),
            )
            .into());
        }

        let mut paths: Vec<PathBuf> = fs::read_dir(&self.directory)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "txt"))
            .collect();
        paths.sort();

        let mut summary = LoadSummary::default();
        for path in &paths {
            self.read_file(path, store, &mut summary)?;
            summary.files += 1;
        }

        info!(
            directory = %self.directory.display(),
            files = summary.files,
            stored = summary.stored,
            skipped = summary.skipped,
            "loaded record files"
        );
        Ok(summary)
    }

    fn read_file(&self, path: &Path, store: &MeasurementStore, summary: &mut LoadSummary) -> Result<()> {
        let reader = BufReader::new(fs::File::open(path)?);

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            match parse_record_line(&line) {
                Ok(m) => {
                    if store.append(m.patient_id(), m.value(), m.kind().clone(), m.timestamp()) {
                        summary.stored += 1;
                    } else {
                        summary.duplicates += 1;
                    }
                }
                Err(e) => {
                    warn!(file = %path.display(), line = index + 1, error = %e, "skipping record line");
                    summary.skipped += 1;
                }
            }
        }

        debug!(file = %path.display(), "file read");
        Ok(())
    }
}

/// Parses one `Name: value, Name: value, ...` record line.
pub fn parse_record_line(line: &str) -> std::result::Result<Measurement, ParseError> {
    let mut parts = line.split(", ");
    let patient_id = field_value(parts.next(), "patient id")?;
    let timestamp = field_value(parts.next(), "timestamp")?;
    let label = field_value(parts.next(), "label")?;
    let data = field_value(parts.next(), "data")?;

    Ok(Measurement::new(
        parse_patient_id(patient_id)?,
        label.parse::<VitalKind>()?,
        parse_value(data)?,
        parse_timestamp(timestamp)?,
    ))
}

fn field_value<'a>(part: Option<&'a str>, name: &'static str) -> std::result::Result<&'a str, ParseError> {
    part.and_then(|p| p.split_once(": "))
        .map(|(_, value)| value.trim())
        .ok_or(ParseError::MissingField(name))
}
