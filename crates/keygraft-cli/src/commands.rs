use std::io::{self, Write};
use std::path::Path;

use anyhow::Context;
use colored::Colorize;
use keygraft_core::{add_missing_keys, load, GraftReport, GraftRequest, NoticeLevel};
use serde::Serialize;
use tracing::debug;

use crate::cli::*;
use crate::config::Config;
use crate::prompt::Prompter;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = Config::resolve(cli.config.as_deref())?;
    let format = cli.format.unwrap_or(config.format);
    let mut out = io::stdout().lock();
    match cli.command {
        Some(Command::Graft(args)) => cmd_graft(args, &config, format, &mut out),
        Some(Command::Prompt) | None => cmd_prompt(&config, format, &mut out),
        Some(Command::Keys(args)) => cmd_keys(&args.path, format, &mut out),
    }
}

/// Build a request from `graft` flags, falling back to config sources.
pub fn graft_request(args: GraftArgs, config: &Config) -> GraftRequest {
    let mut request = GraftRequest::new(args.input, args.output)
        .preserve_metadata(config.preserve_metadata && !args.drop_metadata);
    request.v_pred_source = args.v_pred.or_else(|| config.sources.v_pred.clone());
    request.ztsnr_source = args.ztsnr.or_else(|| config.sources.ztsnr.clone());
    request
}

fn cmd_graft(
    args: GraftArgs,
    config: &Config,
    format: OutputFormat,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let request = graft_request(args, config);
    debug!(?request, "graft from flags");
    let report = add_missing_keys(&request)?;
    render_report(&report, format, out)
}

fn cmd_prompt(config: &Config, format: OutputFormat, out: &mut impl Write) -> anyhow::Result<()> {
    let stdin = io::stdin().lock();
    let mut prompter = Prompter::new(stdin, &mut *out);
    let request = prompter
        .collect()?
        .preserve_metadata(config.preserve_metadata);
    debug!(?request, "graft from prompt");
    let report = add_missing_keys(&request)?;
    render_report(&report, format, out)
}

#[derive(Serialize)]
struct KeyEntry {
    key: String,
    dtype: String,
    shape: Vec<usize>,
}

fn cmd_keys(path: &Path, format: OutputFormat, out: &mut impl Write) -> anyhow::Result<()> {
    let checkpoint =
        load(path).with_context(|| format!("listing keys of {}", path.display()))?;
    let entries: Vec<KeyEntry> = checkpoint
        .iter()
        .map(|(key, tensor)| KeyEntry {
            key: key.to_string(),
            dtype: format!("{:?}", tensor.dtype()),
            shape: tensor.shape().to_vec(),
        })
        .collect();

    match format {
        OutputFormat::Json => writeln!(out, "{}", serde_json::to_string_pretty(&entries)?)?,
        OutputFormat::Text => {
            writeln!(out, "{} tensors in {}", entries.len().to_string().bold(), path.display())?;
            for entry in &entries {
                writeln!(
                    out,
                    "  {}  {} {:?}",
                    entry.key,
                    entry.dtype.cyan(),
                    entry.shape
                )?;
            }
        }
    }
    Ok(())
}

pub fn render_report(
    report: &GraftReport,
    format: OutputFormat,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    if let OutputFormat::Json = format {
        writeln!(out, "{}", serde_json::to_string_pretty(report)?)?;
        return Ok(());
    }

    for notice in report.notices() {
        match notice.level {
            NoticeLevel::Info => writeln!(out, "{} {}", "✓".green().bold(), notice)?,
            NoticeLevel::Warning => writeln!(out, "{} {}", "warning:".yellow().bold(), notice)?,
            NoticeLevel::Error => writeln!(out, "{} {}", "error:".red().bold(), notice)?,
        }
    }
    writeln!(out, "Modified model saved to {}", report.output.display().to_string().bold())?;
    writeln!(out, "Keys in modified model:")?;
    for key in &report.keys {
        writeln!(out, "{key}")?;
    }
    Ok(())
}
