//! Clinical SeqPack - batch converter for per-stay clinical time series
//!
//! SeqPack turns a task root of per-stay CSV tables plus a manifest into
//! fixed-length training tensors through a deterministic pipeline:
//! normalization → vocabulary encoding → sequence packing → target building
//! → archive export.
//!
//! ## Modules
//!
//! - **Stages**: [`normalizer`], [`vocabulary`], [`packer`], [`targets`], [`archive`]
//! - **Orchestration**: [`pipeline`] driven by a [`PipelineConfig`]

pub mod archive;
pub mod config;
pub mod error;
pub mod normalizer;
pub mod packer;
pub mod pipeline;
pub mod table;
pub mod targets;
pub mod types;
pub mod vocabulary;

pub use archive::{read_split, ArchiveExporter, ArchiveManifest, SplitArrays, StaticFeatures};
pub use config::PipelineConfig;
pub use error::{PrepError, Result};
pub use normalizer::Normalizer;
pub use packer::{PackedSplit, SequencePacker};
pub use pipeline::{discover_splits, run_pipeline, PipelineSummary};
pub use targets::{TargetBuilder, Targets, Task};
pub use types::{CodedEvent, LabelTable, NamedEvent, SampleId};
pub use vocabulary::Vocabulary;

/// SeqPack version recorded in every archive manifest
pub const SEQPACK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for archive manifests
pub const PRODUCER_NAME: &str = "clinical-seqpack";
