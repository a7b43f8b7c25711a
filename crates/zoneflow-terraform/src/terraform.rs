//! terraform CLI wrapper
//!
//! Runs one terraform subcommand per invocation with the zone directory as
//! working directory. Parameters become `TF_VAR_<name>` environment variables
//! so secrets never show up in the process list.

use crate::error::{Result, TerraformError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::io::ErrorKind;
use std::process::Stdio;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use zoneflow_core::{ExecutionOutput, Invocation, ProvisioningTool, Verb, ZoneId};

/// Binary used when none is configured
pub const DEFAULT_BIN: &str = "terraform";

/// Lines of stderr kept for the error message of a failed command
const STDERR_TAIL: usize = 20;

/// terraform CLI driver
#[derive(Debug, Clone)]
pub struct TerraformCli {
    bin: String,
}

impl Default for TerraformCli {
    fn default() -> Self {
        Self::new(DEFAULT_BIN)
    }
}

impl TerraformCli {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    pub fn bin(&self) -> &str {
        &self.bin
    }

    /// Arguments for a verb; never prompts and never asks for confirmation
    pub fn args(verb: Verb) -> &'static [&'static str] {
        match verb {
            Verb::Init => &["init", "-input=false", "-no-color"],
            Verb::Apply => &["apply", "-input=false", "-no-color", "-auto-approve"],
            Verb::Destroy => &["destroy", "-input=false", "-no-color", "-auto-approve"],
            Verb::Output => &["output", "-json", "-no-color"],
        }
    }

    /// Run a terraform command and return stdout when `capture` is set.
    /// Otherwise stdout is streamed to the log as it arrives.
    async fn run_command(&self, invocation: &Invocation<'_>) -> Result<Option<String>> {
        let zone = &invocation.zone.id;
        let args = Self::args(invocation.verb);

        let mut cmd = Command::new(&self.bin);
        cmd.args(args);
        cmd.current_dir(&invocation.zone.path);
        cmd.env("TF_IN_AUTOMATION", "1");
        cmd.envs(
            invocation
                .params
                .iter()
                .map(|(name, value)| (format!("TF_VAR_{}", name), value)),
        );
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        tracing::debug!(
            zone = %zone,
            vars = ?invocation.params,
            "Running: {} {}",
            self.bin,
            args.join(" ")
        );

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                TerraformError::NotFound(self.bin.clone())
            } else {
                e.into()
            }
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (stdout, stderr) = tokio::join!(
            read_stdout(stdout, zone, invocation.capture_output),
            read_stderr(stderr, zone)
        );
        let (stdout, stderr) = (stdout?, stderr?);

        let status = child.wait().await?;
        if !status.success() {
            return Err(TerraformError::CommandFailed {
                status: status.to_string(),
                stderr: stderr.join("\n"),
            });
        }

        Ok(stdout)
    }
}

#[async_trait]
impl ProvisioningTool for TerraformCli {
    fn name(&self) -> &str {
        &self.bin
    }

    async fn invoke(&self, invocation: &Invocation<'_>) -> zoneflow_core::Result<ExecutionOutput> {
        let stdout = self.run_command(invocation).await?;
        Ok(ExecutionOutput { stdout })
    }
}

async fn read_stdout(
    stream: Option<impl AsyncRead + Unpin>,
    zone: &ZoneId,
    capture: bool,
) -> std::io::Result<Option<String>> {
    let Some(stream) = stream else {
        return Ok(capture.then(String::new));
    };

    let mut reader = BufReader::new(stream);
    let mut captured = String::new();
    while let Some(line) = next_line(&mut reader).await? {
        if capture {
            captured.push_str(&line);
            captured.push('\n');
        } else {
            tracing::info!(zone = %zone, "{}", line);
        }
    }
    Ok(capture.then_some(captured))
}

async fn read_stderr(
    stream: Option<impl AsyncRead + Unpin>,
    zone: &ZoneId,
) -> std::io::Result<Vec<String>> {
    let Some(stream) = stream else {
        return Ok(Vec::new());
    };

    let mut reader = BufReader::new(stream);
    let mut tail = VecDeque::with_capacity(STDERR_TAIL);
    while let Some(line) = next_line(&mut reader).await? {
        tracing::debug!(zone = %zone, "{}", line);
        if line.trim().is_empty() {
            continue;
        }
        if tail.len() == STDERR_TAIL {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    Ok(tail.into())
}

/// Next line without its terminator. Invalid UTF-8 is replaced rather than
/// rejected so the pipe keeps draining until the child closes it.
async fn next_line(reader: &mut (impl AsyncBufRead + Unpin)) -> std::io::Result<Option<String>> {
    let mut buf = Vec::new();
    if reader.read_until(b'\n', &mut buf).await? == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}
