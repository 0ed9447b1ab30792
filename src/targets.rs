//! Target extraction
//!
//! This module derives supervised targets from a split's label table and
//! aligns them to the sample order of its packed tensor. Supported tasks form
//! a closed set, dispatched through the [`TASKS`] lookup table.

use crate::error::{PrepError, Result};
use crate::packer::PackedSplit;
use crate::table;
use crate::types::{LabelRow, LabelTable, SampleId, LABELS_FILE, SEQ_FILE, STATIC_FILE, TARGETS_FILE};
use log::info;
use ndarray::Array2;
use ndarray_npy::{ReadNpyExt, WriteNpyExt};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

/// Supported benchmark tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Task {
    Mortality,
    Decompensation,
    LengthOfStay,
    Phenotyping,
}

/// Element type of a target array
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Int,
    Float,
}

/// How a task derives its targets from label columns
#[derive(Debug, Clone, Copy)]
pub enum Extraction {
    /// First present column among the candidates, as one scalar per sample
    FirstOf(&'static [&'static str], TargetKind),
    /// Every label column that is not an identifier, as an integer vector
    AllLabels,
}

/// One row of the task table
#[derive(Debug, Clone, Copy)]
pub struct TaskSpec {
    pub task: Task,
    /// Accepted names (lower case); the first is canonical
    pub names: &'static [&'static str],
    pub extraction: Extraction,
}

/// The closed set of supported tasks
pub const TASKS: [TaskSpec; 4] = [
    TaskSpec {
        task: Task::Mortality,
        names: &["mortality", "in_hospital_mortality"],
        extraction: Extraction::FirstOf(
            &["in_hospital_mortality", "mortality", "label"],
            TargetKind::Int,
        ),
    },
    TaskSpec {
        task: Task::Decompensation,
        names: &["decompensation"],
        extraction: Extraction::FirstOf(&["decompensation", "label"], TargetKind::Int),
    },
    TaskSpec {
        task: Task::LengthOfStay,
        names: &["length_of_stay", "los"],
        extraction: Extraction::FirstOf(
            &["length_of_stay", "los", "remain_los"],
            TargetKind::Float,
        ),
    },
    TaskSpec {
        task: Task::Phenotyping,
        names: &["phenotyping"],
        extraction: Extraction::AllLabels,
    },
];

/// Label columns never used as phenotype targets
pub const PHENOTYPE_EXCLUDED_COLUMNS: [&str; 7] = [
    "sample_id",
    "filename",
    "stay",
    "stay_id",
    "subject_id",
    "hadm_id",
    "icustay_id",
];

impl Task {
    pub fn spec(&self) -> &'static TaskSpec {
        match self {
            Task::Mortality => &TASKS[0],
            Task::Decompensation => &TASKS[1],
            Task::LengthOfStay => &TASKS[2],
            Task::Phenotyping => &TASKS[3],
        }
    }

    /// Canonical lower-case name
    pub fn as_str(&self) -> &'static str {
        self.spec().names[0]
    }

    /// Every accepted task name, in table order
    pub fn accepted_names() -> Vec<&'static str> {
        TASKS.iter().flat_map(|spec| spec.names.iter().copied()).collect()
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Task {
    type Err = PrepError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_lowercase();
        TASKS
            .iter()
            .find(|spec| spec.names.contains(&wanted.as_str()))
            .map(|spec| spec.task)
            .ok_or_else(|| PrepError::UnknownTask {
                task: s.to_string(),
                expected: Task::accepted_names().join(", "),
            })
    }
}

impl Serialize for Task {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Task {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Target array of one split; row `i` belongs to the tensor's `sample_ids[i]`
#[derive(Debug, Clone, PartialEq)]
pub enum Targets {
    Int(Array2<i64>),
    Float(Array2<f64>),
}

impl Targets {
    pub fn shape(&self) -> (usize, usize) {
        match self {
            Targets::Int(y) => y.dim(),
            Targets::Float(y) => y.dim(),
        }
    }

    /// NumPy dtype string of the stored array
    pub fn dtype(&self) -> &'static str {
        match self {
            Targets::Int(_) => "int64",
            Targets::Float(_) => "float64",
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        match self {
            Targets::Int(y) => y.write_npy(&mut writer)?,
            Targets::Float(y) => y.write_npy(&mut writer)?,
        }
        writer.flush()?;
        Ok(())
    }

    /// Load a target array, integer first, then floating point
    pub fn load(path: &Path) -> Result<Self> {
        let file = table::open(path)?;
        if let Ok(y) = Array2::<i64>::read_npy(file) {
            return Ok(Targets::Int(y));
        }
        let y = Array2::<f64>::read_npy(table::open(path)?)?;
        Ok(Targets::Float(y))
    }
}

/// Builds aligned targets for one task
#[derive(Debug, Clone, Copy)]
pub struct TargetBuilder {
    task: Task,
}

impl TargetBuilder {
    pub fn new(task: Task) -> Self {
        Self { task }
    }

    pub fn task(&self) -> Task {
        self.task
    }

    /// Build targets whose row `i` belongs to `sample_ids[i]`
    pub fn build(&self, labels: &LabelTable, sample_ids: &[SampleId]) -> Result<Targets> {
        let rows = align(labels, sample_ids)?;

        match self.task.spec().extraction {
            Extraction::FirstOf(candidates, kind) => {
                let col = candidates
                    .iter()
                    .find_map(|c| labels.column_index(c))
                    .ok_or_else(|| PrepError::MissingLabel {
                        task: self.task.to_string(),
                        candidates: candidates.join(", "),
                    })?;
                let name = &labels.columns[col];
                match kind {
                    TargetKind::Int => {
                        let values = rows
                            .iter()
                            .map(|row| parse_int(row, col, name))
                            .collect::<Result<Vec<_>>>()?;
                        Ok(Targets::Int(Array2::from_shape_vec((rows.len(), 1), values)?))
                    }
                    TargetKind::Float => {
                        let values = rows
                            .iter()
                            .map(|row| parse_float(row, col, name))
                            .collect::<Result<Vec<_>>>()?;
                        Ok(Targets::Float(Array2::from_shape_vec((rows.len(), 1), values)?))
                    }
                }
            }
            Extraction::AllLabels => {
                let cols: Vec<usize> = labels
                    .columns
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| !PHENOTYPE_EXCLUDED_COLUMNS.contains(&c.as_str()))
                    .map(|(i, _)| i)
                    .collect();
                if cols.is_empty() {
                    return Err(PrepError::MissingLabel {
                        task: self.task.to_string(),
                        candidates: "any non-identifier label column".to_string(),
                    });
                }

                let mut values = Vec::with_capacity(rows.len() * cols.len());
                for row in &rows {
                    for &col in &cols {
                        values.push(parse_int(row, col, &labels.columns[col])?);
                    }
                }
                Ok(Targets::Int(Array2::from_shape_vec((rows.len(), cols.len()), values)?))
            }
        }
    }

    /// Build `targets.npy` for a packed split directory, forwarding the packed
    /// tensor and any static features for export
    pub fn build_split(&self, in_dir: &Path, out_dir: &Path, split: &str) -> Result<Targets> {
        let labels = table::read_labels(&in_dir.join(LABELS_FILE))?;
        let packed = PackedSplit::load(&in_dir.join(SEQ_FILE), split)?;
        let targets = self.build(&labels, &packed.sample_ids)?;

        table::reset_dir(out_dir, in_dir)?;
        targets.save(&out_dir.join(TARGETS_FILE))?;
        fs::copy(in_dir.join(SEQ_FILE), out_dir.join(SEQ_FILE))?;
        let static_path = in_dir.join(STATIC_FILE);
        if static_path.exists() {
            fs::copy(&static_path, out_dir.join(STATIC_FILE))?;
        }

        let (n, k) = targets.shape();
        info!(
            "Built {} targets for split {}: ({}, {}) {}",
            self.task,
            split,
            n,
            k,
            targets.dtype()
        );
        Ok(targets)
    }
}

/// Reorder label rows to follow `sample_ids` exactly
pub fn align<'a>(labels: &'a LabelTable, sample_ids: &[SampleId]) -> Result<Vec<&'a LabelRow>> {
    let index = labels.by_sample();
    sample_ids
        .iter()
        .map(|id| {
            index.get(id).copied().ok_or_else(|| {
                PrepError::Alignment(format!("sample {id} has no row in the label table"))
            })
        })
        .collect()
}

fn parse_int(row: &LabelRow, col: usize, column: &str) -> Result<i64> {
    let cell = row.values[col].trim();
    if let Ok(v) = cell.parse::<i64>() {
        return Ok(v);
    }
    // Float text such as "1.0" truncates like an integer cast
    match cell.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v.trunc() as i64),
        _ => Err(label_error(row, col, column)),
    }
}

fn parse_float(row: &LabelRow, col: usize, column: &str) -> Result<f64> {
    let cell = row.values[col].trim();
    if cell.is_empty() {
        return Ok(f64::NAN);
    }
    cell.parse::<f64>().map_err(|_| label_error(row, col, column))
}

fn label_error(row: &LabelRow, col: usize, column: &str) -> PrepError {
    PrepError::LabelValue {
        column: column.to_string(),
        sample_id: row.sample_id.to_string(),
        value: row.values[col].clone(),
    }
}
