//! Sequence packing
//!
//! This module packs each sample's chronologically sorted event stream into a
//! fixed `(max_len, 4)` window with columns `(hours, var_id, value, 0)`:
//! - Samples with at most `max_len` events are left-aligned and zero-padded
//! - Longer samples keep only their most recent `max_len` events
//!
//! Padding rows are all zero and cannot be told apart from a real event with
//! id 0 and value 0; id 0 is never assigned by the vocabulary.

use crate::error::{PrepError, Result};
use crate::table;
use crate::types::{CodedEvent, SampleId, EVENTS_FILE, LABELS_FILE, SEQ_FILE};
use log::info;
use ndarray::{s, Array1, Array2, Array3, ArrayViewMut2};
use ndarray_npy::{NpzReader, NpzWriter};
use std::collections::HashSet;
use std::fs::{self, File};
use std::path::Path;

/// Width of a packed event row
pub const PACKED_WIDTH: usize = 4;

/// Default window length
pub const DEFAULT_MAX_LEN: usize = 512;

/// Packed tensor of one split together with its slot -> sample mapping
#[derive(Debug, Clone, PartialEq)]
pub struct PackedSplit {
    pub split: String,
    /// `sample_ids[i]` occupies `tensor[i]`; the cross-stage alignment key
    pub sample_ids: Vec<SampleId>,
    /// Shape `(samples, max_len, PACKED_WIDTH)`
    pub tensor: Array3<f32>,
}

/// Counters for one packed split
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackStats {
    pub samples: usize,
    /// Samples longer than the window
    pub truncated_samples: usize,
    /// Oldest events cut from truncated samples
    pub dropped_events: usize,
}

/// Packs grouped event streams into fixed-length windows
#[derive(Debug, Clone, Copy)]
pub struct SequencePacker {
    max_len: usize,
}

impl Default for SequencePacker {
    fn default() -> Self {
        Self {
            max_len: DEFAULT_MAX_LEN,
        }
    }
}

impl SequencePacker {
    /// Create a packer with the given window length (must be positive)
    pub fn new(max_len: usize) -> Result<Self> {
        if max_len == 0 {
            return Err(PrepError::Config("max_len must be positive".to_string()));
        }
        Ok(Self { max_len })
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Pack one sample's events into a standalone window
    pub fn pack_sample(&self, events: &[CodedEvent]) -> Array2<f32> {
        let mut window = Array2::zeros((self.max_len, PACKED_WIDTH));
        self.fill_window(events, window.view_mut());
        window
    }

    /// Pack a split's events, grouped by consecutive runs of `sample_id`.
    ///
    /// The input must already be sorted by `(sample_id, hours)`; a sample
    /// that reappears after its run ended is rejected rather than re-sorted.
    pub fn pack(&self, split: &str, events: &[CodedEvent]) -> Result<(PackedSplit, PackStats)> {
        if events.is_empty() {
            return Err(PrepError::EmptySplit(split.to_string()));
        }

        let mut runs: Vec<(SampleId, &[CodedEvent])> = Vec::new();
        let mut seen = HashSet::new();
        let mut start = 0;
        for end in 1..=events.len() {
            if end < events.len() && events[end].sample_id == events[start].sample_id {
                continue;
            }
            let sample_id = events[start].sample_id.clone();
            if sample_id.split != split {
                return Err(PrepError::InvariantViolation(format!(
                    "{sample_id} found in events of split '{split}'"
                )));
            }
            if !seen.insert(sample_id.clone()) {
                return Err(PrepError::InvariantViolation(format!(
                    "events of {sample_id} are not contiguous"
                )));
            }
            runs.push((sample_id, &events[start..end]));
            start = end;
        }

        let mut tensor = Array3::zeros((runs.len(), self.max_len, PACKED_WIDTH));
        let mut stats = PackStats::default();
        let mut sample_ids = Vec::with_capacity(runs.len());

        for (slot, (sample_id, sample_events)) in runs.into_iter().enumerate() {
            if sample_events.len() > self.max_len {
                stats.truncated_samples += 1;
                stats.dropped_events += sample_events.len() - self.max_len;
            }
            self.fill_window(sample_events, tensor.slice_mut(s![slot, .., ..]));
            sample_ids.push(sample_id);
        }
        stats.samples = sample_ids.len();

        Ok((
            PackedSplit {
                split: split.to_string(),
                sample_ids,
                tensor,
            },
            stats,
        ))
    }

    /// Pack a split directory's `events.csv` into `seq.npz` and forward labels
    pub fn pack_split(&self, in_dir: &Path, out_dir: &Path, split: &str) -> Result<PackedSplit> {
        let events: Vec<CodedEvent> = table::read_records(&in_dir.join(EVENTS_FILE))?;
        let (packed, stats) = self.pack(split, &events)?;

        table::reset_dir(out_dir, in_dir)?;
        packed.save(&out_dir.join(SEQ_FILE))?;
        fs::copy(in_dir.join(LABELS_FILE), out_dir.join(LABELS_FILE))?;

        info!(
            "Packed split {}: {} samples x {} steps, {} truncated ({} events dropped)",
            split, stats.samples, self.max_len, stats.truncated_samples, stats.dropped_events
        );
        Ok(packed)
    }

    /// Write the most recent `max_len` events left-aligned into `window`
    fn fill_window(&self, events: &[CodedEvent], mut window: ArrayViewMut2<f32>) {
        let keep_from = events.len().saturating_sub(self.max_len);
        for (row, event) in events[keep_from..].iter().enumerate() {
            window[[row, 0]] = event.hours as f32;
            window[[row, 1]] = event.var_id as f32;
            window[[row, 2]] = event.value as f32;
        }
    }
}

impl PackedSplit {
    pub fn len(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sample_ids.is_empty()
    }

    pub fn max_len(&self) -> usize {
        self.tensor.shape()[1]
    }

    /// Save as a compressed `.npz` holding `X` and `sample_index`.
    ///
    /// Only manifest row indices are stored; together with the split name
    /// they reproduce every sample id.
    pub fn save(&self, path: &Path) -> Result<()> {
        let index: Array1<u64> = self.sample_ids.iter().map(|id| id.index as u64).collect();

        let mut npz = NpzWriter::new_compressed(File::create(path)?);
        npz.add_array("X", &self.tensor)?;
        npz.add_array("sample_index", &index)?;
        npz.finish()?;
        Ok(())
    }

    /// Load a packed split written by [`PackedSplit::save`]
    pub fn load(path: &Path, split: &str) -> Result<Self> {
        let file = table::open(path)?;
        let mut npz = NpzReader::new(file)?;
        let tensor: Array3<f32> = npz.by_name("X")?;
        let index: Array1<u64> = npz.by_name("sample_index")?;

        if index.len() != tensor.shape()[0] || tensor.shape()[2] != PACKED_WIDTH {
            return Err(PrepError::InvariantViolation(format!(
                "{} holds {} sample ids for a tensor of shape {:?}",
                path.display(),
                index.len(),
                tensor.shape()
            )));
        }

        let sample_ids = index
            .iter()
            .map(|&i| SampleId::new(split, i as usize))
            .collect();
        Ok(Self {
            split: split.to_string(),
            sample_ids,
            tensor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn events(sample: usize, hours: &[f64]) -> Vec<CodedEvent> {
        hours
            .iter()
            .enumerate()
            .map(|(i, &h)| CodedEvent {
                sample_id: SampleId::new("train", sample),
                hours: h,
                var_id: i as u32 + 1,
                value: 10.0 * (i as f64 + 1.0),
            })
            .collect()
    }

    #[test]
    fn test_zero_max_len_rejected() {
        assert!(matches!(SequencePacker::new(0), Err(PrepError::Config(_))));
    }

    #[test]
    fn test_short_sample_left_aligned_and_padded() {
        let packer = SequencePacker::new(4).unwrap();
        let window = packer.pack_sample(&events(0, &[0.0, 1.5]));

        assert_eq!(window.row(0).to_vec(), vec![0.0, 1.0, 10.0, 0.0]);
        assert_eq!(window.row(1).to_vec(), vec![1.5, 2.0, 20.0, 0.0]);
        assert!(window.slice(s![2.., ..]).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_long_sample_keeps_most_recent() {
        let packer = SequencePacker::new(2).unwrap();
        let window = packer.pack_sample(&events(0, &[0.0, 1.0, 2.0]));

        let hours: Vec<f32> = window.column(0).to_vec();
        assert_eq!(hours, vec![1.0, 2.0]);
        assert_eq!(window.row(0).to_vec(), vec![1.0, 2.0, 20.0, 0.0]);
        assert_eq!(window.row(1).to_vec(), vec![2.0, 3.0, 30.0, 0.0]);
    }

    #[test]
    fn test_exact_length_sample_unchanged() {
        let packer = SequencePacker::new(3).unwrap();
        let window = packer.pack_sample(&events(0, &[0.0, 1.0, 2.0]));
        assert_eq!(window.column(0).to_vec(), vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_pack_groups_in_input_order() {
        let packer = SequencePacker::new(2).unwrap();
        let mut all = events(1, &[0.0, 1.0, 2.0]);
        all.extend(events(3, &[5.0]));

        let (packed, stats) = packer.pack("train", &all).unwrap();

        assert_eq!(packed.tensor.shape(), &[2, 2, 4]);
        assert_eq!(
            packed.sample_ids,
            vec![SampleId::new("train", 1), SampleId::new("train", 3)]
        );
        assert_eq!(packed.tensor[[0, 0, 0]], 1.0);
        assert_eq!(packed.tensor[[1, 0, 0]], 5.0);
        assert_eq!(packed.tensor[[1, 1, 1]], 0.0);
        assert_eq!(
            stats,
            PackStats {
                samples: 2,
                truncated_samples: 1,
                dropped_events: 1
            }
        );
    }

    #[test]
    fn test_pack_rejects_interleaved_samples() {
        let packer = SequencePacker::new(2).unwrap();
        let mut all = events(1, &[0.0]);
        all.extend(events(2, &[0.0]));
        all.extend(events(1, &[1.0]));

        let err = packer.pack("train", &all).unwrap_err();
        assert!(matches!(err, PrepError::InvariantViolation(_)));
    }

    #[test]
    fn test_pack_empty_split() {
        let packer = SequencePacker::default();
        assert!(matches!(
            packer.pack("val", &[]),
            Err(PrepError::EmptySplit(_))
        ));
    }

    #[test]
    fn test_saved_split_loads_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(SEQ_FILE);
        let packer = SequencePacker::new(3).unwrap();
        let mut all = events(0, &[0.0, 0.5]);
        all.extend(events(7, &[2.0]));

        let (packed, _) = packer.pack("train", &all).unwrap();
        packed.save(&path).unwrap();
        let loaded = PackedSplit::load(&path, "train").unwrap();

        assert_eq!(loaded, packed);
        assert_eq!(loaded.max_len(), 3);
    }
}
