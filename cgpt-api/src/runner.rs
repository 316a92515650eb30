//! Child process runner
//!
//! Launches one worker program and collects its output line by line. Two
//! modes:
//! - [`run_streaming`]: no stdin; stdout and stderr are read concurrently and
//!   every complete line is handed to a callback as soon as it arrives
//! - [`run_batch`]: stdin is written in full, then the child is awaited with
//!   a timeout and killed if it overruns
//!
//! A non-zero exit is an ordinary [`RunOutcome`]. Failing to start the
//! program at all is [`RunnerError::Spawn`].

use std::future::Future;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default bound for children fed through stdin
pub const DEFAULT_STDIN_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum RunnerError {
    /// Program missing, not executable, ...
    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' timed out after {}s", after.as_secs())]
    Timeout { program: String, after: Duration },

    #[error("I/O error talking to child process: {0}")]
    Io(#[from] std::io::Error),

    #[error("Run cancelled")]
    Cancelled,
}

/// What to launch
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Piped to the child; selects batch mode
    pub stdin: Option<String>,
    /// Only enforced in batch mode
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            stdin: None,
            timeout: DEFAULT_STDIN_TIMEOUT,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    fn spawn(&self) -> Result<tokio::process::Child, RunnerError> {
        self.command().spawn().map_err(|source| RunnerError::Spawn {
            program: self.program.clone(),
            source,
        })
    }
}

/// One line of child output, terminator stripped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Finished child
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    /// `None` when the child was ended by a signal
    pub exit_code: Option<i32>,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl RunOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Up to `n` trailing non-empty stderr lines
    pub fn stderr_tail(&self, n: usize) -> Vec<String> {
        let lines: Vec<&String> = self.stderr.iter().filter(|l| !l.trim().is_empty()).collect();
        let skip = lines.len().saturating_sub(n);
        lines.into_iter().skip(skip).cloned().collect()
    }

    fn finish(status: ExitStatus, stdout: Vec<String>, stderr: Vec<String>) -> Self {
        Self {
            exit_code: status.code(),
            stdout,
            stderr,
        }
    }
}

/// Run without stdin, streaming each output line to `on_line`
///
/// Lines from one stream arrive in order; stdout and stderr interleave as
/// they are produced. Cancelling `cancel` kills the child.
pub async fn run_streaming<F, Fut>(
    spec: &CommandSpec,
    cancel: &CancellationToken,
    mut on_line: F,
) -> Result<RunOutcome, RunnerError>
where
    F: FnMut(OutputLine) -> Fut,
    Fut: Future<Output = ()>,
{
    info!(program = %spec.program, args = ?spec.args, "Launching worker");

    let mut child = spec.spawn()?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| RunnerError::Io(std::io::Error::other("stdout not captured")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| RunnerError::Io(std::io::Error::other("stderr not captured")))?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let stdout_reader = spawn_line_reader(stdout, tx.clone(), OutputLine::Stdout);
    let stderr_reader = spawn_line_reader(stderr, tx, OutputLine::Stderr);

    let mut outcome = RunOutcome::default();

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                warn!(program = %spec.program, "Cancelling worker");
                if let Err(e) = child.kill().await {
                    warn!(program = %spec.program, error = %e, "Failed to kill worker");
                }
                stdout_reader.abort();
                stderr_reader.abort();
                return Err(RunnerError::Cancelled);
            }

            line = rx.recv() => match line {
                Some(line) => {
                    match &line {
                        OutputLine::Stdout(text) => outcome.stdout.push(text.clone()),
                        OutputLine::Stderr(text) => outcome.stderr.push(text.clone()),
                    }
                    on_line(line).await;
                }
                // Both streams reached EOF
                None => break,
            }
        }
    }

    let status = tokio::select! {
        biased;

        _ = cancel.cancelled() => {
            if let Err(e) = child.kill().await {
                warn!(program = %spec.program, error = %e, "Failed to kill worker");
            }
            return Err(RunnerError::Cancelled);
        }
        status = child.wait() => status?,
    };

    let outcome = RunOutcome::finish(status, outcome.stdout, outcome.stderr);
    info!(program = %spec.program, exit_code = ?outcome.exit_code, "Worker exited");
    Ok(outcome)
}

/// Feed stdin, then wait for exit within `spec.timeout`
///
/// The child is killed when the timeout elapses.
pub async fn run_batch(spec: &CommandSpec) -> Result<RunOutcome, RunnerError> {
    info!(
        program = %spec.program,
        args = ?spec.args,
        timeout_secs = spec.timeout.as_secs(),
        "Launching worker with piped input"
    );

    let mut child = spec.spawn()?;
    let stdin = child.stdin.take();
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| RunnerError::Io(std::io::Error::other("stdout not captured")))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| RunnerError::Io(std::io::Error::other("stderr not captured")))?;
    let input = spec.stdin.clone().unwrap_or_default();

    let collect = async {
        let write_input = async {
            if let Some(mut stdin) = stdin {
                // A child that exits without reading its input is not an error here
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    debug!(error = %e, "Child closed stdin early");
                }
                drop(stdin);
            }
        };

        let mut out = Vec::new();
        let mut err = Vec::new();
        let (_, out_read, err_read, status) = tokio::join!(
            write_input,
            stdout.read_to_end(&mut out),
            stderr.read_to_end(&mut err),
            child.wait()
        );
        out_read?;
        err_read?;
        Ok::<_, std::io::Error>((status?, out, err))
    };

    let result = tokio::time::timeout(spec.timeout, collect).await;

    match result {
        Ok(Ok((status, out, err))) => {
            let outcome = RunOutcome::finish(status, split_lines(&out), split_lines(&err));
            info!(program = %spec.program, exit_code = ?outcome.exit_code, "Worker exited");
            Ok(outcome)
        }
        Ok(Err(e)) => Err(RunnerError::Io(e)),
        Err(_) => {
            warn!(program = %spec.program, timeout_secs = spec.timeout.as_secs(), "Worker timed out, killing");
            if let Err(e) = child.kill().await {
                warn!(program = %spec.program, error = %e, "Failed to kill worker");
            }
            Err(RunnerError::Timeout {
                program: spec.program.clone(),
                after: spec.timeout,
            })
        }
    }
}

fn spawn_line_reader<R>(
    reader: R,
    tx: mpsc::UnboundedSender<OutputLine>,
    wrap: fn(String) -> OutputLine,
) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    if tx.send(wrap(strip_line_ending(&buf))).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Stopped reading child output");
                    break;
                }
            }
        }
    })
}

/// Lossy UTF-8 without the trailing `\n` / `\r\n`
fn strip_line_ending(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    text.trim_end_matches(['\n', '\r']).to_string()
}

fn split_lines(raw: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(raw)
        .lines()
        .map(|l| l.trim_end_matches('\r').to_string())
        .collect()
}
