//! Archive export
//!
//! This module writes every split's arrays into one compressed `.npz`
//! container, grouped by split name (`<split>/X`, `<split>/y`, and
//! `<split>/static` when static features exist), plus a JSON manifest next to
//! it describing the producer and the shape of every stored array.

use crate::error::{PrepError, Result};
use crate::packer::PackedSplit;
use crate::table;
use crate::targets::Targets;
use crate::types::{SEQ_FILE, STATIC_FILE, TARGETS_FILE};
use crate::{PRODUCER_NAME, SEQPACK_VERSION};
use chrono::Utc;
use log::info;
use ndarray::{Array2, Array3, Ix2, OwnedRepr};
use ndarray_npy::{NpzReader, NpzWriter, ReadNpyExt};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Arrays of one split ready for export
#[derive(Debug, Clone, PartialEq)]
pub struct SplitArrays {
    pub split: String,
    /// Packed tensor `(N, L, 4)`
    pub x: Array3<f32>,
    /// Targets with `N` rows
    pub y: Targets,
    /// Optional static features with `N` rows
    pub static_features: Option<StaticFeatures>,
}

/// Per-sample static features, kept in the dtype they were supplied in
#[derive(Debug, Clone, PartialEq)]
pub enum StaticFeatures {
    F32(Array2<f32>),
    F64(Array2<f64>),
    Int(Array2<i64>),
}

impl StaticFeatures {
    pub fn shape(&self) -> (usize, usize) {
        match self {
            StaticFeatures::F32(a) => a.dim(),
            StaticFeatures::F64(a) => a.dim(),
            StaticFeatures::Int(a) => a.dim(),
        }
    }

    /// NumPy dtype name of the stored array
    pub fn dtype(&self) -> &'static str {
        match self {
            StaticFeatures::F32(_) => "float32",
            StaticFeatures::F64(_) => "float64",
            StaticFeatures::Int(_) => "int64",
        }
    }

    /// Load a `.npy` file as `f32`, `f64` or `i64`, whichever it holds
    pub fn load(path: &Path) -> Result<Self> {
        if let Ok(a) = Array2::<f32>::read_npy(table::open(path)?) {
            return Ok(StaticFeatures::F32(a));
        }
        if let Ok(a) = Array2::<f64>::read_npy(table::open(path)?) {
            return Ok(StaticFeatures::F64(a));
        }
        Ok(StaticFeatures::Int(Array2::<i64>::read_npy(table::open(path)?)?))
    }
}

impl SplitArrays {
    /// Load the arrays of a target-stage split directory
    pub fn load(dir: &Path, split: &str) -> Result<Self> {
        let packed = PackedSplit::load(&dir.join(SEQ_FILE), split)?;
        let y = Targets::load(&dir.join(TARGETS_FILE))?;

        let static_path = dir.join(STATIC_FILE);
        let static_features = if static_path.exists() {
            Some(StaticFeatures::load(&static_path)?)
        } else {
            None
        };

        let arrays = Self {
            split: split.to_string(),
            x: packed.tensor,
            y,
            static_features,
        };
        arrays.check_rows()?;
        Ok(arrays)
    }

    pub fn samples(&self) -> usize {
        self.x.shape()[0]
    }

    /// Every array must have one row per packed sample
    fn check_rows(&self) -> Result<()> {
        let n = self.samples();
        let (y_rows, _) = self.y.shape();
        if y_rows != n {
            return Err(PrepError::Alignment(format!(
                "split {}: {} target rows for {} samples",
                self.split, y_rows, n
            )));
        }
        if let Some(features) = &self.static_features {
            let (rows, _) = features.shape();
            if rows != n {
                return Err(PrepError::Alignment(format!(
                    "split {}: {} static rows for {} samples",
                    self.split, rows, n
                )));
            }
        }
        Ok(())
    }
}

/// Producer metadata recorded in the manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveProducer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
}

/// Manifest entry of one split
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitEntry {
    pub name: String,
    pub x_shape: Vec<usize>,
    pub y_shape: Vec<usize>,
    pub y_dtype: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub static_shape: Option<Vec<usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_dtype: Option<String>,
}

/// JSON sidecar describing an exported archive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveManifest {
    pub producer: ArchiveProducer,
    pub created_at_utc: String,
    pub splits: Vec<SplitEntry>,
}

impl ArchiveManifest {
    /// Manifest path that belongs to an archive path
    pub fn path_for(archive: &Path) -> PathBuf {
        archive.with_extension("json")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = table::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Archive exporter for producing the final training container
pub struct ArchiveExporter {
    instance_id: String,
}

impl Default for ArchiveExporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveExporter {
    /// Create a new exporter with a unique instance ID
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create an exporter with a specific instance ID
    pub fn with_instance_id(instance_id: String) -> Self {
        Self { instance_id }
    }

    /// Write all splits into `path` and the manifest beside it
    pub fn export(&self, path: &Path, splits: &[SplitArrays]) -> Result<ArchiveManifest> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut ordered: Vec<&SplitArrays> = splits.iter().collect();
        ordered.sort_by(|a, b| a.split.cmp(&b.split));
        if let Some(pair) = ordered.windows(2).find(|w| w[0].split == w[1].split) {
            return Err(PrepError::Config(format!(
                "split '{}' given twice for export",
                pair[0].split
            )));
        }

        let mut npz = NpzWriter::new_compressed(File::create(path)?);
        let mut entries = Vec::with_capacity(ordered.len());

        for arrays in ordered {
            arrays.check_rows()?;
            let group = &arrays.split;

            npz.add_array(format!("{group}/X"), &arrays.x)?;
            match &arrays.y {
                Targets::Int(y) => npz.add_array(format!("{group}/y"), y)?,
                Targets::Float(y) => npz.add_array(format!("{group}/y"), y)?,
            }
            let static_name = format!("{group}/static");
            match &arrays.static_features {
                Some(StaticFeatures::F32(a)) => npz.add_array(static_name, a)?,
                Some(StaticFeatures::F64(a)) => npz.add_array(static_name, a)?,
                Some(StaticFeatures::Int(a)) => npz.add_array(static_name, a)?,
                None => {}
            }

            let (y_rows, y_cols) = arrays.y.shape();
            entries.push(SplitEntry {
                name: group.clone(),
                x_shape: arrays.x.shape().to_vec(),
                y_shape: vec![y_rows, y_cols],
                y_dtype: arrays.y.dtype().to_string(),
                static_shape: arrays.static_features.as_ref().map(|f| {
                    let (rows, cols) = f.shape();
                    vec![rows, cols]
                }),
                static_dtype: arrays
                    .static_features
                    .as_ref()
                    .map(|f| f.dtype().to_string()),
            });
            info!(
                "Exported split {}: X {:?}, y ({}, {})",
                group,
                arrays.x.shape(),
                y_rows,
                y_cols
            );
        }
        npz.finish()?;

        let manifest = ArchiveManifest {
            producer: ArchiveProducer {
                name: PRODUCER_NAME.to_string(),
                version: SEQPACK_VERSION.to_string(),
                instance_id: self.instance_id.clone(),
            },
            created_at_utc: Utc::now().to_rfc3339(),
            splits: entries,
        };
        fs::write(
            ArchiveManifest::path_for(path),
            serde_json::to_string_pretty(&manifest)?,
        )?;

        info!("Wrote archive {} ({} splits)", path.display(), manifest.splits.len());
        Ok(manifest)
    }
}

/// Read one split group back from an exported archive
pub fn read_split(path: &Path, split: &str) -> Result<SplitArrays> {
    let file = table::open(path)?;
    let mut npz = NpzReader::new(file)?;
    let names = npz.names()?;

    let x_name = format!("{split}/X");
    if !names.contains(&x_name) {
        return Err(PrepError::NotFound(format!(
            "split '{split}' in {}",
            path.display()
        )));
    }
    let x: Array3<f32> = npz.by_name(&x_name)?;

    let y_name = format!("{split}/y");
    let y = match npz.by_name::<OwnedRepr<i64>, Ix2>(&y_name) {
        Ok(y) => Targets::Int(y),
        Err(_) => Targets::Float(npz.by_name(&y_name)?),
    };

    let static_name = format!("{split}/static");
    let static_features = if names.contains(&static_name) {
        Some(read_static_group(&mut npz, &static_name)?)
    } else {
        None
    };

    Ok(SplitArrays {
        split: split.to_string(),
        x,
        y,
        static_features,
    })
}

fn read_static_group(npz: &mut NpzReader<File>, name: &str) -> Result<StaticFeatures> {
    if let Ok(a) = npz.by_name::<OwnedRepr<f32>, Ix2>(name) {
        return Ok(StaticFeatures::F32(a));
    }
    if let Ok(a) = npz.by_name::<OwnedRepr<f64>, Ix2>(name) {
        return Ok(StaticFeatures::F64(a));
    }
    Ok(StaticFeatures::Int(npz.by_name(name)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array3};
    use ndarray_npy::WriteNpyExt;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn split(name: &str, n: usize, y: Targets) -> SplitArrays {
        let mut x = Array3::zeros((n, 2, 4));
        for i in 0..n {
            x[[i, 0, 0]] = i as f32;
        }
        SplitArrays {
            split: name.to_string(),
            x,
            y,
            static_features: None,
        }
    }

    #[test]
    fn test_export_and_read_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out").join("dataset.npz");

        let mut train = split("train", 2, Targets::Int(array![[0], [1]]));
        train.static_features = Some(StaticFeatures::F32(array![[1.0, 2.0], [3.0, 4.0]]));
        let test = split("test", 1, Targets::Float(array![[2.5]]));

        let exporter = ArchiveExporter::with_instance_id("run-1".to_string());
        let manifest = exporter.export(&path, &[train.clone(), test.clone()]).unwrap();

        let names: Vec<&str> = manifest.splits.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["test", "train"]);
        assert_eq!(manifest.producer.instance_id, "run-1");
        assert_eq!(manifest.splits[1].static_shape, Some(vec![2, 2]));
        assert_eq!(manifest.splits[1].static_dtype.as_deref(), Some("float32"));
        assert_eq!(manifest.splits[0].static_dtype, None);
        assert_eq!(manifest.splits[0].y_dtype, "float64");

        assert_eq!(read_split(&path, "train").unwrap(), train);
        assert_eq!(read_split(&path, "test").unwrap(), test);

        let on_disk = ArchiveManifest::load(&ArchiveManifest::path_for(&path)).unwrap();
        assert_eq!(on_disk, manifest);
    }

    #[test]
    fn test_missing_split_in_archive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dataset.npz");
        ArchiveExporter::new()
            .export(&path, &[split("train", 1, Targets::Int(array![[1]]))])
            .unwrap();

        assert!(matches!(
            read_split(&path, "val"),
            Err(PrepError::NotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_split_rejected() {
        let dir = tempdir().unwrap();
        let one = split("train", 1, Targets::Int(array![[1]]));

        let err = ArchiveExporter::new()
            .export(&dir.path().join("dataset.npz"), &[one.clone(), one])
            .unwrap_err();
        assert!(matches!(err, PrepError::Config(_)));
    }

    #[test]
    fn test_row_mismatch_rejected() {
        let dir = tempdir().unwrap();
        let bad = split("train", 2, Targets::Int(array![[1]]));

        let err = ArchiveExporter::new()
            .export(&dir.path().join("dataset.npz"), &[bad])
            .unwrap_err();
        assert!(matches!(err, PrepError::Alignment(_)));
    }

    #[test]
    fn test_static_features_keep_their_dtype() {
        let dir = tempdir().unwrap();
        let wide_path = dir.path().join("wide.npy");
        let int_path = dir.path().join("int.npy");
        let wide: Array2<f64> = array![[16777217.0]];
        let ints: Array2<i64> = array![[3], [-1]];
        wide.write_npy(File::create(&wide_path).unwrap()).unwrap();
        ints.write_npy(File::create(&int_path).unwrap()).unwrap();

        let wide = StaticFeatures::load(&wide_path).unwrap();
        let ints = StaticFeatures::load(&int_path).unwrap();
        assert_eq!(wide, StaticFeatures::F64(array![[16777217.0]]));
        assert_eq!(ints, StaticFeatures::Int(array![[3], [-1]]));

        let mut one = split("train", 1, Targets::Int(array![[1]]));
        one.static_features = Some(wide.clone());
        let mut two = split("test", 2, Targets::Int(array![[0], [1]]));
        two.static_features = Some(ints.clone());

        let path = dir.path().join("dataset.npz");
        let manifest = ArchiveExporter::new().export(&path, &[one, two]).unwrap();

        assert_eq!(manifest.splits[0].static_dtype.as_deref(), Some("int64"));
        assert_eq!(manifest.splits[1].static_dtype.as_deref(), Some("float64"));
        assert_eq!(read_split(&path, "train").unwrap().static_features, Some(wide));
        assert_eq!(read_split(&path, "test").unwrap().static_features, Some(ints));
    }
}
