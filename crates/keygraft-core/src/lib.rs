//! Checkpoint key merger.
//!
//! Some diffusion checkpoints carry marker tensors (`v_pred`, `ztsnr`) that
//! tell inference tools how the model was trained. Fine-tunes and merges
//! often lose them. This crate copies those tensors from donor checkpoints
//! into a target safetensors file, without ever replacing keys the target
//! already has.
//!
//! # Operations
//!
//! - [`load`] -- read a whole checkpoint into an owned [`Checkpoint`]
//! - [`merge`] -- add one key from a supplement checkpoint if missing
//! - [`save`] -- write a checkpoint atomically
//! - [`add_missing_keys`] -- the full load / merge / merge / save run
//!
//! # Error boundaries
//!
//! Loading the input and saving the output are fatal ([`GraftError`]).
//! Problems with a supplement are returned as [`SupplementError`] from
//! [`merge`] and recorded in the [`GraftReport`] by [`add_missing_keys`];
//! the run still writes its output.

pub mod checkpoint;
pub mod error;
pub mod file;
pub mod graft;
pub mod merge;
pub mod tensor;

pub use checkpoint::{Checkpoint, HeaderMetadata};
pub use error::{CheckpointError, CheckpointResult, GraftError, GraftResult, SupplementError};
pub use file::{load, read_tensor, save};
pub use graft::{
    add_missing_keys, add_missing_keys_at, GraftReport, GraftRequest, GraftStep, Notice,
    NoticeLevel, StepStatus, V_PRED_KEY, ZTSNR_KEY,
};
pub use merge::{merge, MergeOutcome};
pub use tensor::Tensor;

pub use safetensors::Dtype;
