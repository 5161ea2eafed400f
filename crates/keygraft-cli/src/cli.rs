use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(
    name = "keygraft",
    about = "Add missing v_pred / ztsnr keys to safetensors checkpoints",
    version
)]
pub struct Cli {
    /// Runs the interactive prompt when omitted.
    #[command(subcommand)]
    pub command: Option<Command>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub format: Option<OutputFormat>,

    /// TOML file with default settings.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Copy missing keys from source checkpoints into a target checkpoint
    Graft(GraftArgs),
    /// Ask for the paths interactively, then graft
    Prompt,
    /// List the tensor keys stored in a checkpoint
    Keys(KeysArgs),
}

#[derive(Args)]
pub struct GraftArgs {
    #[arg(short, long)]
    pub input: PathBuf,
    #[arg(short, long)]
    pub output: PathBuf,
    /// Checkpoint containing a `v_pred` key
    #[arg(long)]
    pub v_pred: Option<PathBuf>,
    /// Checkpoint containing a `ztsnr` key
    #[arg(long)]
    pub ztsnr: Option<PathBuf>,
    /// Do not copy the input's header metadata to the output
    #[arg(long)]
    pub drop_metadata: bool,
}

#[derive(Args)]
pub struct KeysArgs {
    pub path: PathBuf,
}
