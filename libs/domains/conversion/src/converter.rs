//! External converter process.

use crate::error::{ConversionError, ConversionResult};
use std::path::Path;
use std::process::Stdio;
use std::str::FromStr;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// How the converter's result is classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExitCodePolicy {
    /// Any standard-error output fails the job; the exit code is only logged
    #[default]
    StderrOnly,
    /// Standard error must be empty and the exit code zero
    Strict,
}

impl FromStr for ExitCodePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stderr-only" | "stderr_only" => Ok(Self::StderrOnly),
            "strict" => Ok(Self::Strict),
            other => Err(format!(
                "unknown exit code policy {:?} (expected stderr-only or strict)",
                other
            )),
        }
    }
}

/// What the converter printed.
#[derive(Debug, Clone)]
pub struct ConverterOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
}

/// `<program> [args...] <input> <output>` with a timeout.
#[derive(Debug, Clone)]
pub struct ConverterCommand {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    policy: ExitCodePolicy,
}

impl ConverterCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: Duration::from_secs(600),
            policy: ExitCodePolicy::default(),
        }
    }

    /// Split a whitespace-separated command line such as `sh convert.sh`.
    pub fn from_command_line(command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_policy(mut self, policy: ExitCodePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn policy(&self) -> ExitCodePolicy {
        self.policy
    }

    /// Run the converter to completion.
    ///
    /// The child is killed if the timeout fires.
    pub async fn run(&self, input: &Path, output: &Path) -> ConversionResult<ConverterOutput> {
        debug!(
            program = %self.program,
            input = %input.display(),
            output = %output.display(),
            "Starting converter"
        );

        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(input)
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ConversionError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let finished = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ConversionError::Timeout {
                stage: "converter",
                after: self.timeout,
            })?
            .map_err(|e| ConversionError::io("failed to collect converter output", e))?;

        let exit_code = finished.status.code();
        let stdout = String::from_utf8_lossy(&finished.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&finished.stderr).into_owned();

        info!(exit_code = ?exit_code, "Converter exited");
        if !stdout.is_empty() {
            debug!(stdout = %stdout, "Converter output");
        }

        if !stderr.is_empty() {
            return Err(ConversionError::ConverterFailed { stderr, exit_code });
        }
        if self.policy == ExitCodePolicy::Strict && !finished.status.success() {
            return Err(ConversionError::ConverterExit { exit_code });
        }

        Ok(ConverterOutput { exit_code, stdout })
    }
}
