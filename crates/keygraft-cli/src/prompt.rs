use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::bail;
use keygraft_core::{GraftRequest, V_PRED_KEY, ZTSNR_KEY};

/// Line-based question/answer loop that gathers a [`GraftRequest`].
///
/// Generic over its streams so it can be driven from tests.
pub struct Prompter<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Prompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Ask one question and return the trimmed answer.
    pub fn ask(&mut self, question: &str) -> anyhow::Result<String> {
        write!(self.output, "{question}")?;
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            bail!("input closed while waiting for: {}", question.trim_end());
        }
        Ok(line.trim().to_string())
    }

    /// Ask until the answer names an existing filesystem path.
    pub fn ask_existing_path(&mut self, question: &str) -> anyhow::Result<PathBuf> {
        loop {
            let path = PathBuf::from(self.ask(question)?);
            if !path.as_os_str().is_empty() && path.exists() {
                return Ok(path);
            }
            writeln!(self.output, "File does not exist. Please try again.")?;
        }
    }

    /// Only `yes`, in any case, is yes. Anything else is no.
    pub fn confirm(&mut self, question: &str) -> anyhow::Result<bool> {
        Ok(self.ask(question)?.to_lowercase() == "yes")
    }

    fn optional_source(&mut self, key: &str) -> anyhow::Result<Option<PathBuf>> {
        if !self.confirm(&format!("Do you want to add a '{key}' key? (yes/no): "))? {
            return Ok(None);
        }
        let path =
            self.ask_existing_path(&format!("Enter the path to the model with '{key}' key: "))?;
        Ok(Some(path))
    }

    /// Run the full question sequence.
    pub fn collect(&mut self) -> anyhow::Result<GraftRequest> {
        let input = self.ask_existing_path("Enter the path to the input model: ")?;
        let output = PathBuf::from(self.ask("Enter the path to save the modified model: ")?);
        let mut request = GraftRequest::new(input, output);
        request.v_pred_source = self.optional_source(V_PRED_KEY)?;
        request.ztsnr_source = self.optional_source(ZTSNR_KEY)?;
        Ok(request)
    }
}
