//! Event normalization
//!
//! This module turns one raw split (a manifest plus one wide time-series CSV
//! per stay) into canonical long-format events and a label table.
//! - Time axis detected from a fixed preference list, minutes converted to hours
//! - Every non-time column unpivoted into (hours, variable, value) events
//! - Non-numeric observations dropped and counted
//! - Manifest columns that are not identifiers carried through as labels

use crate::error::{PrepError, Result};
use crate::table::{self, RawTable};
use crate::types::{LabelTable, NamedEvent, SampleId, LABELS_FILE, LISTFILE};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};

/// Accepted time-axis column names, in order of preference
pub const TIME_COLUMN_CANDIDATES: [&str; 6] =
    ["Hours", "hours", "Time", "time", "Minutes", "minutes"];

/// Manifest columns that identify a stay rather than label it
pub const MANIFEST_ID_COLUMNS: [&str; 8] = [
    "stay",
    "stay_id",
    "subject_id",
    "hadm_id",
    "icustay_id",
    "filename",
    "time",
    "hours",
];

/// Header of a per-sample event table
pub const NAMED_EVENT_HEADER: [&str; 4] = ["sample_id", "hours", "variable", "value"];

/// Aggregate counters for one normalized split
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizeStats {
    /// Samples read from the manifest
    pub samples: usize,
    /// Events emitted
    pub events: usize,
    /// Observation cells dropped as missing or non-numeric
    pub dropped_values: usize,
    /// Whole rows dropped because their time cell was unusable
    pub dropped_time_rows: usize,
    /// Samples left without a single event
    pub empty_samples: usize,
}

/// Events of one sample, in chronological order
#[derive(Debug, Clone, PartialEq)]
pub struct SampleEvents {
    pub sample_id: SampleId,
    pub events: Vec<NamedEvent>,
}

/// Result of normalizing one split
#[derive(Debug, Clone)]
pub struct NormalizedSplit {
    pub split: String,
    /// Raw split directory the samples were read from
    pub source_dir: PathBuf,
    /// Samples in manifest order
    pub samples: Vec<SampleEvents>,
    pub labels: LabelTable,
    pub stats: NormalizeStats,
}

/// Normalizer for converting raw per-stay tables into long-format events
pub struct Normalizer;

impl Normalizer {
    /// Find the time-axis column of a raw time-series table
    pub fn detect_time_column(headers: &[String]) -> Result<usize> {
        TIME_COLUMN_CANDIDATES
            .iter()
            .find_map(|cand| headers.iter().position(|h| h == cand))
            .ok_or_else(|| {
                PrepError::Schema(format!(
                    "no time column found, expected one of {}",
                    TIME_COLUMN_CANDIDATES.join("/")
                ))
            })
    }

    /// Convert a raw time value to hours given the name of its column
    pub fn to_hours(raw: f64, time_column: &str) -> f64 {
        if time_column.to_lowercase().contains("min") {
            raw / 60.0
        } else {
            raw
        }
    }

    /// Unpivot one wide time-series table into chronologically ordered events.
    ///
    /// Rows are stably sorted by time and emitted row-major, so hours never
    /// decrease and ties keep their original row (then column) order.
    pub fn melt(
        sample_id: &SampleId,
        table: &RawTable,
        stats: &mut NormalizeStats,
    ) -> Result<Vec<NamedEvent>> {
        let time_idx = Self::detect_time_column(&table.headers)?;
        let time_column = &table.headers[time_idx];

        let mut timed_rows: Vec<(f64, &Vec<String>)> = Vec::with_capacity(table.rows.len());
        for row in &table.rows {
            match row.get(time_idx).and_then(|cell| parse_numeric(cell)) {
                Some(t) => timed_rows.push((Self::to_hours(t, time_column), row)),
                None => stats.dropped_time_rows += 1,
            }
        }
        timed_rows.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut events = Vec::new();
        for (hours, row) in timed_rows {
            for (col, variable) in table.headers.iter().enumerate() {
                if col == time_idx {
                    continue;
                }
                match row.get(col).and_then(|cell| parse_numeric(cell)) {
                    Some(value) => events.push(NamedEvent {
                        sample_id: sample_id.clone(),
                        hours,
                        variable: variable.clone(),
                        value,
                    }),
                    None => stats.dropped_values += 1,
                }
            }
        }

        Ok(events)
    }

    /// Normalize every sample listed in a split's manifest
    pub fn normalize_split(split_dir: &Path, split: &str) -> Result<NormalizedSplit> {
        let mut manifest = table::read_raw(&split_dir.join(LISTFILE))?;
        for header in manifest.headers.iter_mut() {
            *header = header.trim().to_lowercase();
        }

        let filename_idx = find_filename_column(&manifest)?;
        manifest.headers[filename_idx] = "filename".to_string();

        let label_idx: Vec<usize> = manifest
            .headers
            .iter()
            .enumerate()
            .filter(|(_, h)| !MANIFEST_ID_COLUMNS.contains(&h.as_str()))
            .map(|(i, _)| i)
            .collect();
        if label_idx.is_empty() {
            return Err(PrepError::Schema(format!(
                "no label columns detected in {}",
                split_dir.join(LISTFILE).display()
            )));
        }

        let mut labels = LabelTable::new(
            label_idx
                .iter()
                .map(|&i| manifest.headers[i].clone())
                .collect(),
        );
        let mut samples = Vec::with_capacity(manifest.rows.len());
        let mut stats = NormalizeStats::default();

        for (row_index, row) in manifest.rows.iter().enumerate() {
            let sample_id = SampleId::new(split, row_index);
            let series_path = resolve_series_path(split_dir, &row[filename_idx])?;

            let series = table::read_raw(&series_path)?;
            let events = Self::melt(&sample_id, &series, &mut stats)?;
            debug!(
                "{}: {} events from {}",
                sample_id,
                events.len(),
                series_path.display()
            );

            if events.is_empty() {
                warn!("{} has no numeric observations", sample_id);
                stats.empty_samples += 1;
            }
            stats.samples += 1;
            stats.events += events.len();

            labels.push(
                sample_id.clone(),
                label_idx.iter().map(|&i| row[i].clone()).collect(),
            );
            samples.push(SampleEvents { sample_id, events });
        }

        debug!(
            "{}: dropped {} non-numeric values and {} rows without time",
            split, stats.dropped_values, stats.dropped_time_rows
        );

        Ok(NormalizedSplit {
            split: split.to_string(),
            source_dir: split_dir.to_path_buf(),
            samples,
            labels,
            stats,
        })
    }

    /// Write one event table per sample plus the label table
    pub fn write_split(out_dir: &Path, normalized: &NormalizedSplit) -> Result<()> {
        table::reset_dir(out_dir, &normalized.source_dir)?;

        for sample in &normalized.samples {
            let path = out_dir.join(format!("{}.csv", sample.sample_id));
            table::write_records(&path, &NAMED_EVENT_HEADER, &sample.events)?;
        }
        table::write_labels(&out_dir.join(LABELS_FILE), &normalized.labels)?;

        info!(
            "Normalized split {}: {} samples, {} events -> {}",
            normalized.split,
            normalized.stats.samples,
            normalized.stats.events,
            out_dir.display()
        );
        Ok(())
    }
}

/// Locate the manifest column naming each sample's time-series file
fn find_filename_column(manifest: &RawTable) -> Result<usize> {
    manifest
        .column_index("filename")
        .or_else(|| manifest.headers.iter().position(|h| h.contains("file")))
        .ok_or_else(|| {
            PrepError::Schema(format!("{LISTFILE} must contain a filename column"))
        })
}

/// Resolve a manifest filename against the split directory, falling back to
/// its base name when the listed subdirectory does not exist.
fn resolve_series_path(split_dir: &Path, filename: &str) -> Result<PathBuf> {
    let primary = split_dir.join(filename);
    if primary.exists() {
        return Ok(primary);
    }

    if let Some(base) = Path::new(filename).file_name() {
        let fallback = split_dir.join(base);
        if fallback.exists() {
            return Ok(fallback);
        }
    }

    Err(PrepError::NotFound(format!(
        "timeseries file not found: {}",
        primary.display()
    )))
}

/// Coerce a cell to a number; missing, non-numeric and NaN cells yield `None`
fn parse_numeric(cell: &str) -> Option<f64> {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| !v.is_nan())
}
