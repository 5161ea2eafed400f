use std::path::PathBuf;

use safetensors::SafeTensorError;

/// Errors from reading or writing a checkpoint file.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// The file could not be opened, mapped, or written.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The bytes are not a valid safetensors container, or serialization failed.
    #[error("invalid safetensors data in {}: {source}", .path.display())]
    Format {
        path: PathBuf,
        #[source]
        source: SafeTensorError,
    },
}

impl CheckpointError {
    /// Path of the file the error refers to.
    pub fn path(&self) -> &std::path::Path {
        match self {
            Self::Io { path, .. } | Self::Format { path, .. } => path,
        }
    }
}

/// Result alias for checkpoint file operations.
pub type CheckpointResult<T> = Result<T, CheckpointError>;

/// A supplement checkpoint could not be processed during a merge step.
///
/// Recoverable: the working set is left untouched and the run continues.
#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct SupplementError {
    /// Key the merge step was looking for.
    pub key: String,
    /// Supplement checkpoint that could not be read.
    pub path: PathBuf,
    #[source]
    pub source: CheckpointError,
}

/// Fatal errors that abort a graft run.
#[derive(Debug, thiserror::Error)]
pub enum GraftError {
    /// The input checkpoint could not be loaded.
    #[error("failed to load input checkpoint: {0}")]
    Load(#[source] CheckpointError),

    /// The merged checkpoint could not be written.
    #[error("failed to save output checkpoint: {0}")]
    Save(#[source] CheckpointError),
}

pub type GraftResult<T> = Result<T, GraftError>;
