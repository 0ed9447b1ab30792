//! Pipeline orchestration
//!
//! This module drives the five stages over every split, each stage reading
//! only its predecessor's output root and writing its own:
//!
//! 1. Normalizer - raw split -> `clean/<split>`
//! 2. Vocabulary - `clean` -> `encoded/var_to_id.json` + `encoded/<split>`
//! 3. SequencePacker - `encoded/<split>` -> `packed/<split>`
//! 4. TargetBuilder - `packed/<split>` -> `targets/<split>`
//! 5. ArchiveExporter - `targets` -> one `.npz` archive

use crate::archive::{ArchiveExporter, ArchiveManifest, SplitArrays};
use crate::config::PipelineConfig;
use crate::error::{PrepError, Result};
use crate::normalizer::{NormalizeStats, Normalizer};
use crate::packer::SequencePacker;
use crate::targets::{Targets, TargetBuilder, Task};
use crate::types::{LISTFILE, VOCAB_FILE};
use crate::vocabulary::{EncodedSplit, Vocabulary};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};

/// Split names looked for under a raw task root, in processing order
pub const SPLIT_CANDIDATES: [&str; 4] = ["train", "val", "validation", "test"];

/// Stage output directories under the work root
pub const CLEAN_DIR: &str = "clean";
pub const ENCODED_DIR: &str = "encoded";
pub const PACKED_DIR: &str = "packed";
pub const TARGETS_DIR: &str = "targets";

/// Outcome of a full run
#[derive(Debug, Clone)]
pub struct PipelineSummary {
    pub splits: Vec<String>,
    pub normalized: Vec<NormalizeStats>,
    pub vocabulary_size: usize,
    pub encoded: Vec<EncodedSplit>,
    pub manifest: ArchiveManifest,
}

/// Splits under a raw task root that carry a manifest
pub fn discover_splits(task_root: &Path) -> Vec<String> {
    SPLIT_CANDIDATES
        .iter()
        .filter(|name| task_root.join(name).join(LISTFILE).exists())
        .map(|name| name.to_string())
        .collect()
}

/// Split directories under an intermediate stage root, sorted by name
pub fn list_split_dirs(stage_root: &Path) -> Result<Vec<String>> {
    let mut splits = Vec::new();
    for entry in fs::read_dir(stage_root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            splits.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    splits.sort();
    Ok(splits)
}

/// Stage 1: normalize every raw split into `clean_root/<split>`
pub fn normalize_splits(
    task_root: &Path,
    splits: &[String],
    clean_root: &Path,
) -> Result<Vec<NormalizeStats>> {
    let mut stats = Vec::with_capacity(splits.len());
    for split in splits {
        let normalized = Normalizer::normalize_split(&task_root.join(split), split)?;
        Normalizer::write_split(&clean_root.join(split), &normalized)?;
        stats.push(normalized.stats);
    }
    Ok(stats)
}

/// Stage 2a: build the global vocabulary over every normalized split
pub fn build_vocabulary(clean_root: &Path, splits: &[String]) -> Result<Vocabulary> {
    let dirs: Vec<PathBuf> = splits.iter().map(|s| clean_root.join(s)).collect();
    Vocabulary::scan(&dirs)
}

/// Stage 2b: persist the vocabulary and re-encode every split with it
pub fn encode_splits(
    vocab: &Vocabulary,
    clean_root: &Path,
    splits: &[String],
    encoded_root: &Path,
) -> Result<Vec<EncodedSplit>> {
    vocab.save(&encoded_root.join(VOCAB_FILE))?;
    splits
        .iter()
        .map(|split| vocab.encode_split(&clean_root.join(split), &encoded_root.join(split), split))
        .collect()
}

/// Stage 3: pack every encoded split
pub fn pack_splits(
    packer: &SequencePacker,
    encoded_root: &Path,
    splits: &[String],
    packed_root: &Path,
) -> Result<()> {
    for split in splits {
        packer.pack_split(&encoded_root.join(split), &packed_root.join(split), split)?;
    }
    Ok(())
}

/// Stage 4: build aligned targets for every packed split
pub fn build_targets(
    task: Task,
    packed_root: &Path,
    splits: &[String],
    targets_root: &Path,
) -> Result<Vec<Targets>> {
    let builder = TargetBuilder::new(task);
    splits
        .iter()
        .map(|split| builder.build_split(&packed_root.join(split), &targets_root.join(split), split))
        .collect()
}

/// Stage 5: export every split into a single archive
pub fn export_archive(
    exporter: &ArchiveExporter,
    targets_root: &Path,
    splits: &[String],
    archive_path: &Path,
) -> Result<ArchiveManifest> {
    let arrays = splits
        .iter()
        .map(|split| SplitArrays::load(&targets_root.join(split), split))
        .collect::<Result<Vec<_>>>()?;
    exporter.export(archive_path, &arrays)
}

/// Run all five stages in order for the configured splits
pub fn run_pipeline(config: &PipelineConfig) -> Result<PipelineSummary> {
    config.validate()?;

    let splits = match &config.splits {
        Some(splits) => splits.clone(),
        None => discover_splits(&config.task_root),
    };
    if splits.is_empty() {
        return Err(PrepError::NotFound(format!(
            "no splits with {LISTFILE} under {} (expected {})",
            config.task_root.display(),
            SPLIT_CANDIDATES.join("/")
        )));
    }
    info!(
        "Running {} pipeline over splits [{}] with max_len {}",
        config.task,
        splits.join(", "),
        config.max_len
    );

    let clean_root = config.work_root.join(CLEAN_DIR);
    let encoded_root = config.work_root.join(ENCODED_DIR);
    let packed_root = config.work_root.join(PACKED_DIR);
    let targets_root = config.work_root.join(TARGETS_DIR);

    let normalized = normalize_splits(&config.task_root, &splits, &clean_root)?;

    let vocab = build_vocabulary(&clean_root, &splits)?;
    let encoded = encode_splits(&vocab, &clean_root, &splits, &encoded_root)?;

    let packer = SequencePacker::new(config.max_len)?;
    pack_splits(&packer, &encoded_root, &splits, &packed_root)?;

    build_targets(config.task, &packed_root, &splits, &targets_root)?;

    let manifest = export_archive(
        &ArchiveExporter::new(),
        &targets_root,
        &splits,
        &config.archive_path,
    )?;

    Ok(PipelineSummary {
        splits,
        normalized,
        vocabulary_size: vocab.len(),
        encoded,
        manifest,
    })
}
