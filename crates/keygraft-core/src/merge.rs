use std::path::Path;

use serde::Serialize;
use tracing::debug;

use crate::checkpoint::Checkpoint;
use crate::error::SupplementError;
use crate::file::read_tensor;

/// What a merge step did to the working set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeOutcome {
    /// No supplement path was given.
    NoSource,
    /// The key was already in the working set; the supplement was not opened.
    AlreadyPresent,
    /// The key was copied from the supplement.
    Added,
    /// The supplement was readable but does not contain the key.
    KeyMissing,
}

impl MergeOutcome {
    /// Whether the working set was modified.
    pub fn changed(self) -> bool {
        matches!(self, Self::Added)
    }
}

/// Copy `key` from the checkpoint at `supplement` into `base` if `base` lacks it.
///
/// `base` is only ever extended: an existing key is never replaced, and on
/// `Err` nothing has been written.
pub fn merge(
    base: &mut Checkpoint,
    supplement: Option<&Path>,
    key: &str,
) -> Result<MergeOutcome, SupplementError> {
    let Some(path) = supplement else {
        return Ok(MergeOutcome::NoSource);
    };
    if base.contains(key) {
        debug!(key, "key already present; supplement not opened");
        return Ok(MergeOutcome::AlreadyPresent);
    }

    let tensor = read_tensor(path, key).map_err(|source| SupplementError {
        key: key.to_string(),
        path: path.to_path_buf(),
        source,
    })?;

    match tensor {
        Some(tensor) => {
            debug!(key, source = %path.display(), bytes = tensor.byte_len(), "key added");
            base.insert_if_absent(key, tensor);
            Ok(MergeOutcome::Added)
        }
        None => Ok(MergeOutcome::KeyMissing),
    }
}
