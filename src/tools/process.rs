//! External process execution
//!
//! Everything that talks to k3d, helm or kubectl goes through the
//! [`ProcessExecutor`] trait so that providers can be exercised against
//! scripted fakes instead of real binaries.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, trace};

/// Errors that can occur while running an external command
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("'{program}' exited with code {code}: {stderr}")]
    Failed {
        program: String,
        code: i32,
        stderr: String,
    },
}

/// An external command invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub program: String,
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl Command {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Render the command line for logs
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }

    fn to_tokio(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args).kill_on_drop(true);
        if let Some(dir) = &self.dir {
            cmd.current_dir(dir);
        }
        cmd.envs(&self.env);
        cmd
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecuteResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Convert a non-zero exit into [`ProcessError::Failed`]
    pub fn check(self, program: &str) -> Result<Self, ProcessError> {
        if self.success() {
            Ok(self)
        } else {
            Err(ProcessError::Failed {
                program: program.to_string(),
                code: self.exit_code,
                stderr: self.stderr,
            })
        }
    }

    /// First line of stdout, which is where most tools print their version
    pub fn first_line(&self) -> &str {
        self.stdout.lines().next().map(str::trim).unwrap_or_default()
    }
}

// ============================================================================
// SBIO: Trait for abstraction (allows fakes in tests)
// ============================================================================

#[async_trait]
pub trait ProcessExecutor: Send + Sync {
    /// Run a command to completion and capture its output.
    ///
    /// A non-zero exit is not an error here; callers inspect
    /// [`ExecuteResult::exit_code`] because some tools report expected
    /// conditions ("not found") that way.
    async fn execute(&self, command: &Command) -> Result<ExecuteResult, ProcessError>;

    /// Run a command and forward stdout and stderr line by line to `sink`.
    async fn stream(
        &self,
        command: &Command,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<(), ProcessError>;
}

// ============================================================================
// SBIO: I/O implementation (real subprocesses)
// ============================================================================

/// Executor backed by `tokio::process`.
///
/// Children are spawned with `kill_on_drop`, so dropping an in-flight
/// operation (timeout, Ctrl-C) also stops the process it started.
#[derive(Debug, Clone, Default)]
pub struct SystemExecutor;

impl SystemExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessExecutor for SystemExecutor {
    async fn execute(&self, command: &Command) -> Result<ExecuteResult, ProcessError> {
        debug!("exec: {}", command.display());

        let output = command
            .to_tokio()
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| ProcessError::Spawn {
                program: command.program.clone(),
                source,
            })?;

        let result = ExecuteResult {
            // Signal-terminated processes have no code
            exit_code: output.status.code().unwrap_or(1),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        };

        trace!(
            "exit {} from {} (stdout {} bytes, stderr {} bytes)",
            result.exit_code,
            command.program,
            result.stdout.len(),
            result.stderr.len()
        );

        Ok(result)
    }

    async fn stream(
        &self,
        command: &Command,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<(), ProcessError> {
        debug!("stream: {}", command.display());

        let mut child = command
            .to_tokio()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: command.program.clone(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            ProcessError::Io(std::io::Error::other("stdout was not captured"))
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            ProcessError::Io(std::io::Error::other("stderr was not captured"))
        })?;

        let mut out_lines = BufReader::new(stdout).lines();
        let mut err_lines = BufReader::new(stderr).lines();
        let mut out_done = false;
        let mut err_done = false;

        while !(out_done && err_done) {
            tokio::select! {
                line = out_lines.next_line(), if !out_done => match line? {
                    Some(line) => write_line(sink, &line).await?,
                    None => out_done = true,
                },
                line = err_lines.next_line(), if !err_done => match line? {
                    Some(line) => write_line(sink, &line).await?,
                    None => err_done = true,
                },
            }
        }
        sink.flush().await?;

        let status = child.wait().await?;
        if !status.success() {
            return Err(ProcessError::Failed {
                program: command.program.clone(),
                code: status.code().unwrap_or(1),
                stderr: String::new(),
            });
        }

        Ok(())
    }
}

async fn write_line(
    sink: &mut (dyn AsyncWrite + Unpin + Send),
    line: &str,
) -> std::io::Result<()> {
    sink.write_all(line.as_bytes()).await?;
    sink.write_all(b"\n").await
}

/// Ask a tool for its version, failing when it is missing from PATH or errors.
pub async fn tool_version(
    executor: &dyn ProcessExecutor,
    program: &str,
    version_args: &[&str],
) -> Result<String, ProcessError> {
    let command = Command::new(program).args(version_args.iter().copied());
    let result = executor.execute(&command).await?.check(program)?;
    Ok(result.first_line().to_string())
}

// ============================================================================
// SBIO: Scripted implementation for testing (no I/O)
// ============================================================================
