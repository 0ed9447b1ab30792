//! Variable vocabulary
//!
//! This module builds the global variable-name -> id mapping over every split
//! and re-encodes normalized events with it. Id 0 is reserved for padding and
//! never assigned. The mapping is persisted as a flat JSON object so that new
//! samples can later be encoded against the same ids.

use crate::error::{PrepError, Result};
use crate::table;
use crate::types::{CodedEvent, NamedEvent, EVENTS_FILE, LABELS_FILE};
use log::{debug, info};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Header of a split-level coded events table
pub const CODED_EVENT_HEADER: [&str; 4] = ["sample_id", "hours", "var_id", "value"];

/// Frozen mapping between variable names and ids in `1..=len`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vocabulary {
    ids: BTreeMap<String, u32>,
    /// `names[id - 1]` is the name of `id`
    names: Vec<String>,
}

/// Summary of one re-encoded split
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedSplit {
    pub split: String,
    pub samples: usize,
    pub events: usize,
}

impl Vocabulary {
    /// Build a vocabulary from observed names; ids follow lexicographic order
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let sorted: BTreeSet<String> = names.into_iter().map(Into::into).collect();
        let names: Vec<String> = sorted.into_iter().collect();
        let ids = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i as u32 + 1))
            .collect();
        Self { ids, names }
    }

    /// Build the vocabulary over every per-sample event table in the given
    /// normalized split directories
    pub fn scan(split_dirs: &[PathBuf]) -> Result<Self> {
        let mut observed = BTreeSet::new();
        for dir in split_dirs {
            for path in sample_tables(dir)? {
                let events: Vec<NamedEvent> = table::read_records(&path)?;
                observed.extend(events.into_iter().map(|e| e.variable));
            }
        }

        let vocab = Self::from_names(observed);
        info!(
            "Built vocabulary of {} variables over {} splits",
            vocab.len(),
            split_dirs.len()
        );
        Ok(vocab)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Id of a variable name
    pub fn encode(&self, name: &str) -> Option<u32> {
        self.ids.get(name).copied()
    }

    /// Name of an id; `None` for the padding id 0 and unknown ids
    pub fn decode(&self, id: u32) -> Option<&str> {
        let idx = (id as usize).checked_sub(1)?;
        self.names.get(idx).map(String::as_str)
    }

    /// Iterate `(name, id)` pairs in id order
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i as u32 + 1))
    }

    /// Re-encode named events. An unknown name means the vocabulary was not
    /// built from these events and is reported as an invariant violation.
    pub fn encode_events(&self, events: &[NamedEvent]) -> Result<Vec<CodedEvent>> {
        events
            .iter()
            .map(|e| {
                let var_id = self.encode(&e.variable).ok_or_else(|| {
                    PrepError::InvariantViolation(format!(
                        "variable '{}' of {} is not in the vocabulary",
                        e.variable, e.sample_id
                    ))
                })?;
                Ok(CodedEvent {
                    sample_id: e.sample_id.clone(),
                    hours: e.hours,
                    var_id,
                    value: e.value,
                })
            })
            .collect()
    }

    /// Re-encode one normalized split into a single sorted events table and
    /// forward its label table
    pub fn encode_split(&self, in_dir: &Path, out_dir: &Path, split: &str) -> Result<EncodedSplit> {
        let tables = sample_tables(in_dir)?;
        if tables.is_empty() {
            return Err(PrepError::EmptySplit(split.to_string()));
        }

        let mut coded = Vec::new();
        for path in &tables {
            let events: Vec<NamedEvent> = table::read_records(path)?;
            debug!("{}: {} events", path.display(), events.len());
            coded.extend(self.encode_events(&events)?);
        }

        // Stable, so equal (sample, hours) keep their stage-1 order
        coded.sort_by(|a, b| {
            a.sample_id
                .cmp(&b.sample_id)
                .then(a.hours.total_cmp(&b.hours))
        });

        table::reset_dir(out_dir, in_dir)?;
        table::write_records(&out_dir.join(EVENTS_FILE), &CODED_EVENT_HEADER, &coded)?;
        fs::copy(in_dir.join(LABELS_FILE), out_dir.join(LABELS_FILE))?;

        info!(
            "Encoded split {}: {} samples, {} events -> {}",
            split,
            tables.len(),
            coded.len(),
            out_dir.display()
        );

        Ok(EncodedSplit {
            split: split.to_string(),
            samples: tables.len(),
            events: coded.len(),
        })
    }

    /// Serialize to a JSON object of name -> id
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.ids)?)
    }

    /// Load from a JSON object of name -> id, checking that the ids are
    /// exactly `1..=len`
    pub fn from_json(json: &str) -> Result<Self> {
        let ids: BTreeMap<String, u32> = serde_json::from_str(json)?;

        let mut slots: Vec<Option<String>> = vec![None; ids.len()];
        for (name, &id) in &ids {
            let slot = (id as usize)
                .checked_sub(1)
                .and_then(|idx| slots.get_mut(idx))
                .ok_or_else(|| {
                    PrepError::InvariantViolation(format!(
                        "vocabulary id {id} for '{name}' is outside 1..={}",
                        ids.len()
                    ))
                })?;
            if let Some(previous) = slot.replace(name.clone()) {
                return Err(PrepError::InvariantViolation(format!(
                    "vocabulary id {id} assigned to both '{previous}' and '{name}'"
                )));
            }
        }

        // Every slot is filled: len ids, each unique and within 1..=len
        let names = slots.into_iter().flatten().collect();
        Ok(Self { ids, names })
    }

    /// Write the vocabulary file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Read a vocabulary file
    pub fn load(path: &Path) -> Result<Self> {
        let json = table::read_to_string(path)?;
        Self::from_json(&json)
    }
}

/// Per-sample event tables of a normalized split directory, in path order
pub fn sample_tables(split_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(split_dir)? {
        let path = entry?.path();
        let is_csv = path.extension().map_or(false, |ext| ext == "csv");
        let is_labels = path.file_name().map_or(false, |name| name == LABELS_FILE);
        if path.is_file() && is_csv && !is_labels {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}
