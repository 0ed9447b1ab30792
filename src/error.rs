//! Error types for clinical-seqpack

use thiserror::Error;

/// Errors that can occur while converting a split
#[derive(Debug, Error)]
pub enum PrepError {
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Alignment error: {0}")]
    Alignment(String),

    #[error("Unknown task '{task}'. Expected one of: {expected}")]
    UnknownTask { task: String, expected: String },

    #[error("Missing label for task {task}: expected one of [{candidates}]")]
    MissingLabel { task: String, candidates: String },

    #[error("Invalid label value '{value}' in column '{column}' for sample {sample_id}")]
    LabelValue {
        column: String,
        sample_id: String,
        value: String,
    },

    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Split '{0}' contains no samples")]
    EmptySplit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("Failed to write .npy: {0}")]
    NpyWrite(#[from] ndarray_npy::WriteNpyError),

    #[error("Failed to read .npy: {0}")]
    NpyRead(#[from] ndarray_npy::ReadNpyError),

    #[error("Failed to write .npz: {0}")]
    NpzWrite(#[from] ndarray_npy::WriteNpzError),

    #[error("Failed to read .npz: {0}")]
    NpzRead(#[from] ndarray_npy::ReadNpzError),
}

impl PrepError {
    /// Stable machine-readable code for this error kind
    pub fn code(&self) -> &'static str {
        match self {
            PrepError::Schema(_) => "SCHEMA_ERROR",
            PrepError::NotFound(_) => "NOT_FOUND",
            PrepError::Alignment(_) => "ALIGNMENT_ERROR",
            PrepError::UnknownTask { .. } => "UNKNOWN_TASK",
            PrepError::MissingLabel { .. } => "MISSING_LABEL",
            PrepError::LabelValue { .. } => "LABEL_VALUE_ERROR",
            PrepError::InvariantViolation(_) => "INVARIANT_VIOLATION",
            PrepError::EmptySplit(_) => "EMPTY_SPLIT",
            PrepError::Config(_) => "CONFIG_ERROR",
            PrepError::Io(_) => "IO_ERROR",
            PrepError::Csv(_) => "CSV_ERROR",
            PrepError::Json(_) => "JSON_ERROR",
            PrepError::Shape(_) => "SHAPE_ERROR",
            PrepError::NpyWrite(_) | PrepError::NpyRead(_) => "NPY_ERROR",
            PrepError::NpzWrite(_) | PrepError::NpzRead(_) => "NPZ_ERROR",
        }
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, PrepError>;
