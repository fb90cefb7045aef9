//! External process execution.
//!
//! [`run`] is the single place where child processes are spawned. Output
//! is streamed line by line into the job log as it is produced and also
//! captured for the caller. Cancellation is checked before the process is
//! spawned; once running, a process is always allowed to finish so that a
//! git object store is never left half-written.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;

use crate::context::JobContext;
use crate::error::{CommandFailure, CoreResult};

/// Maximum stdout or stderr size captured per stream (10 MiB).
///
/// Lines past this limit are still forwarded to the job log but are not
/// kept in memory.
const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Description of a process to run.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    env: Vec<(String, String)>,
    stdin: Option<Vec<u8>>,
    echo_stdout: bool,
    desc: Option<String>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            stdin: None,
            echo_stdout: true,
            desc: None,
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

    pub fn cwd(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, data: Vec<u8>) -> Self {
        self.stdin = Some(data);
        self
    }

    /// Keep stdout out of the job log (plumbing queries with large or
    /// uninteresting output). Stderr is always forwarded.
    pub fn quiet(mut self) -> Self {
        self.echo_stdout = false;
        self
    }

    /// Caller-facing description used if the process fails.
    pub fn describe(mut self, desc: impl Into<String>) -> Self {
        self.desc = Some(desc.into());
        self
    }

    /// Program followed by its arguments.
    pub fn command_line(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }

    fn description(&self) -> String {
        self.desc
            .clone()
            .unwrap_or_else(|| format!("Command '{}' failed", self.command_line().join(" ")))
    }
}

/// Captured output of a successful process.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration_ms: u64,
}

/// Run a process to completion.
///
/// Returns [`crate::error::CoreError::Cancelled`] without spawning if the
/// job was cancelled, and [`crate::error::CoreError::Command`] if the
/// process could not be spawned or exited unsuccessfully.
pub async fn run(ctx: &JobContext, spec: ProcessSpec) -> CoreResult<ProcessOutput> {
    ctx.ensure_active()?;

    let cmdline = spec.command_line();
    tracing::debug!(job_id = %ctx.job_id(), cmd = ?cmdline, "Spawning process");

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in &spec.env {
        cmd.env(key, value);
    }
    if let Some(dir) = &spec.cwd {
        cmd.current_dir(dir);
    }

    let start = Instant::now();
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return Err(CommandFailure {
                desc: spec.description(),
                cmd: cmdline,
                exit_code: None,
                stderr: e.to_string(),
            }
            .into());
        }
    };

    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    // Input is fed while the output is drained, so neither pipe can fill up
    // and stall the other.
    let feed = async {
        if let (Some(mut stdin), Some(data)) = (stdin, spec.stdin.as_ref()) {
            // Best-effort write; the process may legitimately close stdin early.
            let _ = stdin.write_all(data).await;
        }
    };

    let ((), stdout, stderr, status) = tokio::join!(
        feed,
        pump(ctx, stdout, spec.echo_stdout),
        pump(ctx, stderr, true),
        child.wait(),
    );
    let duration_ms = start.elapsed().as_millis() as u64;

    let status = match status {
        Ok(status) => status,
        Err(e) => {
            return Err(CommandFailure {
                desc: spec.description(),
                cmd: cmdline,
                exit_code: None,
                stderr: e.to_string(),
            }
            .into());
        }
    };

    if !status.success() {
        tracing::debug!(
            job_id = %ctx.job_id(),
            cmd = ?cmdline,
            exit_code = ?status.code(),
            duration_ms,
            "Process failed"
        );
        return Err(CommandFailure {
            desc: spec.description(),
            cmd: cmdline,
            exit_code: status.code(),
            stderr,
        }
        .into());
    }

    Ok(ProcessOutput {
        stdout,
        stderr,
        exit_code: status.code().unwrap_or(0),
        duration_ms,
    })
}

/// Read a stream line by line, forwarding each line to the job log and
/// capturing up to [`MAX_OUTPUT_BYTES`].
async fn pump<R: AsyncRead + Unpin>(ctx: &JobContext, handle: Option<R>, echo: bool) -> String {
    let Some(handle) = handle else {
        return String::new();
    };
    let mut reader = BufReader::new(handle);
    let mut captured = String::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                if echo {
                    ctx.output(line.trim_end_matches(['\n', '\r'])).await;
                }
                if captured.len() + line.len() <= MAX_OUTPUT_BYTES {
                    captured.push_str(&line);
                }
            }
            Err(e) => {
                tracing::debug!(job_id = %ctx.job_id(), error = %e, "Output stream read failed");
                break;
            }
        }
    }
    captured
}
