//! SeqPack CLI - Command-line interface for Clinical SeqPack
//!
//! Commands:
//! - normalize: Raw task root -> long-format events per sample
//! - vocab: Build the global vocabulary and re-encode events
//! - pack: Pack encoded events into fixed-length windows
//! - targets: Build aligned target arrays for a task
//! - export: Write all splits into one archive
//! - run: All five stages from flags or a config file
//! - inspect: Describe a vocabulary or an exported archive

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clinical_seqpack::archive::{ArchiveExporter, ArchiveManifest};
use clinical_seqpack::config::check_split_names;
use clinical_seqpack::packer::{SequencePacker, DEFAULT_MAX_LEN};
use clinical_seqpack::pipeline::{self, list_split_dirs};
use clinical_seqpack::types::VOCAB_FILE;
use clinical_seqpack::{PipelineConfig, PrepError, Task, Vocabulary, SEQPACK_VERSION};

/// SeqPack - Convert per-stay clinical time series into training tensors
#[derive(Parser)]
#[command(name = "seqpack")]
#[command(version = SEQPACK_VERSION)]
#[command(about = "Convert per-stay clinical time series into fixed-length tensors", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize raw per-stay tables into long-format events
    Normalize {
        /// Raw task root with one directory per split
        #[arg(long)]
        task_root: PathBuf,

        /// Output root for normalized splits
        #[arg(short, long)]
        out: PathBuf,

        /// Splits to process (default: discovered under the task root)
        #[arg(long = "split")]
        splits: Vec<String>,
    },

    /// Build the global vocabulary and re-encode every split
    Vocab {
        /// Root of normalized splits
        #[arg(short, long)]
        input: PathBuf,

        /// Output root for encoded splits and the vocabulary
        #[arg(short, long)]
        out: PathBuf,

        #[arg(long = "split")]
        splits: Vec<String>,
    },

    /// Pack encoded events into fixed-length windows
    Pack {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        out: PathBuf,

        /// Window length
        #[arg(long, default_value_t = DEFAULT_MAX_LEN)]
        max_len: usize,

        #[arg(long = "split")]
        splits: Vec<String>,
    },

    /// Build target arrays aligned with the packed samples
    Targets {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        out: PathBuf,

        /// Task name (e.g. "mortality", "los", "phenotyping")
        #[arg(long)]
        task: String,

        #[arg(long = "split")]
        splits: Vec<String>,
    },

    /// Export every split into a single archive
    Export {
        #[arg(short, long)]
        input: PathBuf,

        /// Archive path (a .json manifest is written beside it)
        #[arg(short, long)]
        out: PathBuf,

        #[arg(long = "split")]
        splits: Vec<String>,
    },

    /// Run all five stages
    Run {
        /// Load configuration from a JSON file; other flags override it
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        task: Option<String>,

        #[arg(long)]
        task_root: Option<PathBuf>,

        #[arg(long)]
        work_root: Option<PathBuf>,

        #[arg(long)]
        archive: Option<PathBuf>,

        #[arg(long)]
        max_len: Option<usize>,

        #[arg(long = "split")]
        splits: Vec<String>,

        /// Write the effective configuration to this path
        #[arg(long)]
        save_config: Option<PathBuf>,
    },

    /// Describe a vocabulary file, an encoded root, or an archive
    Inspect {
        path: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), PrepError> {
    match cli.command {
        Commands::Normalize {
            task_root,
            out,
            splits,
        } => {
            let splits = if splits.is_empty() {
                pipeline::discover_splits(&task_root)
            } else {
                check_split_names(&splits)?;
                splits
            };
            require_splits(&splits, &task_root)?;
            pipeline::normalize_splits(&task_root, &splits, &out)?;
            Ok(())
        }

        Commands::Vocab { input, out, splits } => {
            let splits = resolve_splits(&input, splits)?;
            let vocab = pipeline::build_vocabulary(&input, &splits)?;
            pipeline::encode_splits(&vocab, &input, &splits, &out)?;
            println!("{} variables -> {}", vocab.len(), out.join(VOCAB_FILE).display());
            Ok(())
        }

        Commands::Pack {
            input,
            out,
            max_len,
            splits,
        } => {
            let splits = resolve_splits(&input, splits)?;
            let packer = SequencePacker::new(max_len)?;
            pipeline::pack_splits(&packer, &input, &splits, &out)
        }

        Commands::Targets {
            input,
            out,
            task,
            splits,
        } => {
            let task: Task = task.parse()?;
            let splits = resolve_splits(&input, splits)?;
            pipeline::build_targets(task, &input, &splits, &out)?;
            Ok(())
        }

        Commands::Export { input, out, splits } => {
            let splits = resolve_splits(&input, splits)?;
            let manifest = pipeline::export_archive(&ArchiveExporter::new(), &input, &splits, &out)?;
            println!("{}", serde_json::to_string_pretty(&manifest)?);
            Ok(())
        }

        Commands::Run {
            config,
            task,
            task_root,
            work_root,
            archive,
            max_len,
            splits,
            save_config,
        } => {
            let mut config = match config {
                Some(path) => PipelineConfig::load_json(path)?,
                None => {
                    let task = task
                        .as_deref()
                        .ok_or_else(|| missing_flag("--task"))?
                        .parse()?;
                    PipelineConfig::new(
                        task,
                        task_root.clone().ok_or_else(|| missing_flag("--task-root"))?,
                        work_root.clone().ok_or_else(|| missing_flag("--work-root"))?,
                        archive.clone().ok_or_else(|| missing_flag("--archive"))?,
                    )
                }
            };

            if let Some(task) = task {
                config.task = task.parse()?;
            }
            if let Some(task_root) = task_root {
                config.task_root = task_root;
            }
            if let Some(work_root) = work_root {
                config.work_root = work_root;
            }
            if let Some(archive) = archive {
                config.archive_path = archive;
            }
            if let Some(max_len) = max_len {
                config.max_len = max_len;
            }
            if !splits.is_empty() {
                config.splits = Some(splits);
            }
            config.validate()?;

            if let Some(path) = save_config {
                config.save_json(path)?;
            }

            let summary = clinical_seqpack::run_pipeline(&config)?;
            println!("{}", serde_json::to_string_pretty(&summary.manifest)?);
            Ok(())
        }

        Commands::Inspect { path, json } => cmd_inspect(&path, json),
    }
}

fn cmd_inspect(path: &Path, json: bool) -> Result<(), PrepError> {
    if path.extension().is_some_and(|ext| ext == "npz") {
        let manifest = ArchiveManifest::load(&ArchiveManifest::path_for(path))?;
        if json {
            println!("{}", serde_json::to_string_pretty(&manifest)?);
        } else {
            println!(
                "{} {} (instance {}), created {}",
                manifest.producer.name,
                manifest.producer.version,
                manifest.producer.instance_id,
                manifest.created_at_utc
            );
            for split in &manifest.splits {
                println!(
                    "  {:<12} X {:?}  y {:?} {}{}",
                    split.name,
                    split.x_shape,
                    split.y_shape,
                    split.y_dtype,
                    split
                        .static_shape
                        .as_ref()
                        .map(|s| format!(
                            "  static {s:?} {}",
                            split.static_dtype.as_deref().unwrap_or("")
                        ))
                        .unwrap_or_default()
                );
            }
        }
        return Ok(());
    }

    let vocab_path = if path.is_dir() {
        path.join(VOCAB_FILE)
    } else {
        path.to_path_buf()
    };
    let vocab = Vocabulary::load(&vocab_path)?;
    if json {
        println!("{}", vocab.to_json()?);
    } else {
        println!("{} variables in {}", vocab.len(), vocab_path.display());
        for (name, id) in vocab.iter() {
            println!("  {id:>5}  {name}");
        }
    }
    Ok(())
}

/// Explicit splits win; otherwise every split directory under `root`
fn resolve_splits(root: &Path, splits: Vec<String>) -> Result<Vec<String>, PrepError> {
    let splits = if splits.is_empty() {
        list_split_dirs(root)?
    } else {
        check_split_names(&splits)?;
        splits
    };
    require_splits(&splits, root)?;
    Ok(splits)
}

fn require_splits(splits: &[String], root: &Path) -> Result<(), PrepError> {
    if splits.is_empty() {
        return Err(PrepError::NotFound(format!("no splits under {}", root.display())));
    }
    Ok(())
}

fn missing_flag(flag: &str) -> PrepError {
    PrepError::Config(format!("{flag} is required without --config"))
}

// Error types

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<PrepError> for CliError {
    fn from(e: PrepError) -> Self {
        let hint = match &e {
            PrepError::Schema(_) => Some("Check manifest and time-series column headers"),
            PrepError::NotFound(_) | PrepError::Io(_) => {
                Some("Check file paths and that the previous stage has run")
            }
            PrepError::Alignment(_) => Some("Re-run the stages for this split in order"),
            PrepError::UnknownTask { .. } => Some("Run 'seqpack targets --help' for task names"),
            PrepError::MissingLabel { .. } => Some("Check the label columns of listfile.csv"),
            PrepError::LabelValue { .. } => Some("Fix or remove the offending label cell"),
            PrepError::InvariantViolation(_) => {
                Some("Intermediate files were modified; re-run from the vocab stage")
            }
            PrepError::EmptySplit(_) => Some("Remove the split or add samples to it"),
            PrepError::Config(_) => Some("Run 'seqpack run --help' for options"),
            PrepError::Json(_) => Some("Check JSON syntax"),
            _ => None,
        };
        CliError {
            code: e.code().to_string(),
            message: e.to_string(),
            hint: hint.map(str::to_string),
        }
    }
}
