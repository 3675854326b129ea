//! External command execution.
//!
//! Every collaborator this crate talks to (the image builder, the platform
//! CLI, `sgdisk`, `losetup`, `mount`, `qemu-img`, `hivexsh`) is a
//! subprocess. `Cmd` runs one, captures its output and logs it.

use crate::errors::{CommandError, ImagegateError, Result};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace};

/// Bytes of stderr kept in a `CommandError`.
const STDERR_TAIL: usize = 2048;

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if terminated by a signal.
    pub code: Option<i32>,
    /// Captured standard output, lossily decoded.
    pub stdout: String,
    /// Captured standard error, lossily decoded.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns true if the command exited with status 0.
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Exit code with signals folded into a generic failure code.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.code.unwrap_or(-1)
    }
}

/// Builder for an external command.
#[derive(Debug, Clone)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
    stdin: Option<String>,
}

impl Cmd {
    /// Creates a command for `program`.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
        }
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_string_lossy().into_owned());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_string_lossy().into_owned()));
        self
    }

    /// Feeds `input` to the command's standard input.
    #[must_use]
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// The program name.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// The argument list.
    #[must_use]
    pub fn arg_list(&self) -> &[String] {
        &self.args
    }

    /// Runs the command to completion without interpreting its exit status.
    ///
    /// Only a failure to spawn is an error.
    pub async fn run(&self) -> Result<CommandOutput> {
        debug!(program = %self.program, args = ?self.args, "Running command");

        let mut command = tokio::process::Command::new(&self.program);
        command
            .args(&self.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| ImagegateError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        if let (Some(input), Some(mut pipe)) = (self.stdin.as_ref(), child.stdin.take()) {
            pipe.write_all(input.as_bytes()).await?;
            drop(pipe);
        }

        let output = child.wait_with_output().await?;
        let result = CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        trace!(program = %self.program, stdout = %result.stdout, "Command stdout");
        debug!(program = %self.program, code = ?result.code, "Command finished");
        Ok(result)
    }

    /// Runs the command and turns a non-zero exit into an error.
    pub async fn run_checked(&self) -> Result<CommandOutput> {
        let output = self.run().await?;
        if output.success() {
            Ok(output)
        } else {
            Err(self.failure(&output).into())
        }
    }

    /// Runs the command synchronously, for use from cleanup callbacks.
    pub fn run_blocking(&self) -> std::result::Result<(), String> {
        debug!(program = %self.program, args = ?self.args, "Running command (blocking)");
        let output = std::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| format!("failed to spawn '{}': {e}", self.program))?;

        if output.status.success() {
            Ok(())
        } else {
            let result = CommandOutput {
                code: output.status.code(),
                stdout: String::new(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            };
            Err(self.failure(&result).to_string())
        }
    }

    fn failure(&self, output: &CommandOutput) -> CommandError {
        let stderr = &output.stderr;
        let start = stderr.len().saturating_sub(STDERR_TAIL);
        let start = (start..stderr.len())
            .find(|i| stderr.is_char_boundary(*i))
            .unwrap_or(stderr.len());
        CommandError::new(&self.program, self.args.clone(), output.code, &stderr[start..])
    }
}

/// Locates an executable on `PATH`, or checks an explicit path.
#[must_use]
pub fn find_tool(tool: &str) -> Option<PathBuf> {
    let candidate = Path::new(tool);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths)
            .map(|dir| dir.join(tool))
            .find(|path| path.is_file())
    })
}
