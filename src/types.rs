//! Core types for the clinical-seqpack pipeline
//!
//! This module defines the records that flow between stages: sample
//! identities, named and coded events, and the per-split label table.

use crate::error::{PrepError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Manifest listing the samples of a raw split
pub const LISTFILE: &str = "listfile.csv";
/// Per-split label table written by the normalizer and forwarded downstream
pub const LABELS_FILE: &str = "labels.csv";
/// Concatenated, re-encoded events of one split
pub const EVENTS_FILE: &str = "events.csv";
/// Persisted name -> id vocabulary
pub const VOCAB_FILE: &str = "var_to_id.json";
/// Packed sequence container of one split
pub const SEQ_FILE: &str = "seq.npz";
/// Target array of one split
pub const TARGETS_FILE: &str = "targets.npy";
/// Optional static feature array of one split
pub const STATIC_FILE: &str = "static.npy";

/// Stable identity of one stay within a split.
///
/// Rendered as `{split}_{index}`, where `index` is the zero-based row of the
/// stay in the split's manifest. Ordering is by split, then numerically by
/// index, which reproduces manifest order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SampleId {
    pub split: String,
    pub index: usize,
}

impl SampleId {
    pub fn new(split: impl Into<String>, index: usize) -> Self {
        Self {
            split: split.into(),
            index,
        }
    }
}

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.split, self.index)
    }
}

impl FromStr for SampleId {
    type Err = PrepError;

    fn from_str(s: &str) -> Result<Self> {
        // Split names may contain '_', the index never does
        let (split, index) = s
            .rsplit_once('_')
            .ok_or_else(|| PrepError::InvariantViolation(format!("malformed sample id '{s}'")))?;
        let index = index
            .parse::<usize>()
            .map_err(|_| PrepError::InvariantViolation(format!("malformed sample id '{s}'")))?;
        if split.is_empty() {
            return Err(PrepError::InvariantViolation(format!(
                "malformed sample id '{s}'"
            )));
        }
        Ok(SampleId::new(split, index))
    }
}

impl Serialize for SampleId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SampleId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// One observation with its variable still named (stage 1 output)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedEvent {
    pub sample_id: SampleId,
    /// Offset from stay start in hours
    pub hours: f64,
    pub variable: String,
    pub value: f64,
}

/// One observation with its variable encoded as a vocabulary id (stage 2 output)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodedEvent {
    pub sample_id: SampleId,
    pub hours: f64,
    /// Vocabulary id, always >= 1
    pub var_id: u32,
    pub value: f64,
}

/// Per-split label table: one row of verbatim label cells per sample
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelTable {
    /// Label column names (without the leading `sample_id`)
    pub columns: Vec<String>,
    /// Rows in insertion order
    pub rows: Vec<LabelRow>,
}

/// A single label row
#[derive(Debug, Clone, PartialEq)]
pub struct LabelRow {
    pub sample_id: SampleId,
    pub values: Vec<String>,
}

impl LabelTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, sample_id: SampleId, values: Vec<String>) {
        self.rows.push(LabelRow { sample_id, values });
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a label column
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Index rows by sample id
    pub fn by_sample(&self) -> HashMap<&SampleId, &LabelRow> {
        self.rows.iter().map(|row| (&row.sample_id, row)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_sample_id_display_and_parse() {
        let id = SampleId::new("train", 12);
        assert_eq!(id.to_string(), "train_12");
        assert_eq!("train_12".parse::<SampleId>().unwrap(), id);
    }

    #[test]
    fn test_sample_id_split_with_underscore() {
        let id: SampleId = "hold_out_3".parse().unwrap();
        assert_eq!(id, SampleId::new("hold_out", 3));
    }

    #[test]
    fn test_sample_id_rejects_malformed() {
        assert!("train".parse::<SampleId>().is_err());
        assert!("train_x".parse::<SampleId>().is_err());
        assert!("_4".parse::<SampleId>().is_err());
    }

    #[test]
    fn test_sample_id_orders_numerically() {
        let mut ids = vec![
            SampleId::new("train", 10),
            SampleId::new("train", 2),
            SampleId::new("train", 1),
        ];
        ids.sort();
        let rendered: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        assert_eq!(rendered, vec!["train_1", "train_2", "train_10"]);
    }

    #[test]
    fn test_label_table_lookup() {
        let mut table = LabelTable::new(vec!["mortality".to_string()]);
        table.push(SampleId::new("val", 0), vec!["1".to_string()]);
        table.push(SampleId::new("val", 1), vec!["0".to_string()]);

        assert_eq!(table.column_index("mortality"), Some(0));
        assert_eq!(table.column_index("los"), None);

        let index = table.by_sample();
        assert_eq!(index[&SampleId::new("val", 1)].values, vec!["0"]);
    }
}
