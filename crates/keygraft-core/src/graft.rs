use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{GraftError, GraftResult};
use crate::file::{load, save};
use crate::merge::{merge, MergeOutcome};

/// Key flagging v-prediction checkpoints.
pub const V_PRED_KEY: &str = "v_pred";
/// Key flagging zero-terminal-SNR checkpoints.
pub const ZTSNR_KEY: &str = "ztsnr";

/// Parameters of a single graft run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GraftRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub v_pred_source: Option<PathBuf>,
    pub ztsnr_source: Option<PathBuf>,
    /// Carry the input's header `__metadata__` into the output.
    pub preserve_metadata: bool,
}

impl GraftRequest {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            v_pred_source: None,
            ztsnr_source: None,
            preserve_metadata: true,
        }
    }

    pub fn with_v_pred_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.v_pred_source = Some(path.into());
        self
    }

    pub fn with_ztsnr_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.ztsnr_source = Some(path.into());
        self
    }

    pub fn preserve_metadata(mut self, preserve: bool) -> Self {
        self.preserve_metadata = preserve;
        self
    }

    /// Merge steps in the order they run.
    pub fn steps(&self) -> [(&'static str, Option<&Path>); 2] {
        [
            (V_PRED_KEY, self.v_pred_source.as_deref()),
            (ZTSNR_KEY, self.ztsnr_source.as_deref()),
        ]
    }
}

/// Result of one merge step, including the recoverable failure case.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
    NoSource,
    AlreadyPresent,
    Added,
    KeyMissing,
    Failed { reason: String },
}

impl From<MergeOutcome> for StepStatus {
    fn from(outcome: MergeOutcome) -> Self {
        match outcome {
            MergeOutcome::NoSource => Self::NoSource,
            MergeOutcome::AlreadyPresent => Self::AlreadyPresent,
            MergeOutcome::Added => Self::Added,
            MergeOutcome::KeyMissing => Self::KeyMissing,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// Human-readable message about a merge step, for the caller to display.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GraftStep {
    pub key: String,
    pub source: Option<PathBuf>,
    #[serde(flatten)]
    pub status: StepStatus,
}

impl GraftStep {
    /// Notice for this step, if it produced one worth showing.
    pub fn notice(&self) -> Option<Notice> {
        let source = self
            .source
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let (level, message) = match &self.status {
            StepStatus::NoSource | StepStatus::AlreadyPresent => return None,
            StepStatus::Added => (
                NoticeLevel::Info,
                format!("Added '{}' key from {source}", self.key),
            ),
            StepStatus::KeyMissing => (
                NoticeLevel::Warning,
                format!("'{}' key not found in {source}", self.key),
            ),
            StepStatus::Failed { reason } => (
                NoticeLevel::Error,
                format!("Error adding {}: {reason}", self.key),
            ),
        };
        Some(Notice { level, message })
    }
}

/// Summary of a completed graft run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GraftReport {
    pub output: PathBuf,
    pub steps: Vec<GraftStep>,
    /// Keys of the written checkpoint, in working-set order.
    pub keys: Vec<String>,
}

impl GraftReport {
    pub fn notices(&self) -> impl Iterator<Item = Notice> + '_ {
        self.steps.iter().filter_map(GraftStep::notice)
    }

    /// Keys that were added by this run.
    pub fn added(&self) -> impl Iterator<Item = &str> {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Added)
            .map(|s| s.key.as_str())
    }
}

/// Load `request.input`, add missing `v_pred`/`ztsnr` keys from the given
/// sources, and write the result to `request.output`.
///
/// Failures reading a source checkpoint are recorded in the report and do
/// not stop the run. Failures loading the input or saving the output do.
pub fn add_missing_keys(request: &GraftRequest) -> GraftResult<GraftReport> {
    let mut base = load(&request.input).map_err(GraftError::Load)?;
    if !request.preserve_metadata {
        base.set_metadata(None);
    }

    let mut steps = Vec::with_capacity(2);
    for (key, source) in request.steps() {
        let status = match merge(&mut base, source, key) {
            Ok(outcome) => StepStatus::from(outcome),
            Err(err) => {
                warn!(key, error = %err, "supplement skipped");
                StepStatus::Failed {
                    reason: err.to_string(),
                }
            }
        };
        steps.push(GraftStep {
            key: key.to_string(),
            source: source.map(Path::to_path_buf),
            status,
        });
    }

    save(&base, &request.output).map_err(GraftError::Save)?;
    debug!(output = %request.output.display(), tensors = base.len(), "graft complete");

    Ok(GraftReport {
        output: request.output.clone(),
        steps,
        keys: base.keys().map(String::from).collect(),
    })
}

/// [`add_missing_keys`] taking the four paths directly.
pub fn add_missing_keys_at(
    input: &Path,
    output: &Path,
    v_pred_source: Option<&Path>,
    ztsnr_source: Option<&Path>,
) -> GraftResult<GraftReport> {
    let request = GraftRequest {
        input: input.to_path_buf(),
        output: output.to_path_buf(),
        v_pred_source: v_pred_source.map(Path::to_path_buf),
        ztsnr_source: ztsnr_source.map(Path::to_path_buf),
        preserve_metadata: true,
    };
    add_missing_keys(&request)
}
