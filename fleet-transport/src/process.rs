//! Subprocess plumbing: bounded runs and chunked output streaming.
//!
//! Flash tools report progress with carriage returns, so streamed output is
//! forwarded in small raw chunks rather than line-buffered.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::TransportError;

/// Read size for streamed subprocess output
const STREAM_CHUNK: usize = 256;

/// Ordered log channel shared by a task and everything it calls.
///
/// Sends never block and never fail from the producer's point of view; a
/// dropped receiver simply discards further output.
#[derive(Clone)]
pub struct LogSink {
    tx: mpsc::UnboundedSender<String>,
}

impl LogSink {
    pub fn channel() -> (LogSink, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (LogSink { tx }, rx)
    }

    pub fn send(&self, line: impl Into<String>) {
        let _ = self.tx.send(line.into());
    }

    /// A sink that discards everything (quiet callers)
    pub fn discard() -> LogSink {
        let (sink, _rx) = Self::channel();
        sink
    }
}

/// Captured result of a bounded subprocess run
#[derive(Debug)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

fn describe(program: &str, args: &[&str]) -> String {
    let mut s = String::from(program);
    for a in args {
        s.push(' ');
        s.push_str(a);
    }
    s
}

/// Run a command to completion, capturing output. With a timeout the child
/// is killed when the deadline passes.
pub async fn run_command(
    program: &str,
    args: &[&str],
    timeout: Option<Duration>,
) -> Result<CommandOutput, TransportError> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("running: {}", describe(program, args));

    let fut = cmd.output();
    let output = match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| TransportError::Timeout(describe(program, args)))??,
        None => fut.await?,
    };

    Ok(CommandOutput {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Run a command in a working directory, discarding output (build sub-steps).
pub async fn run_command_in(
    dir: &std::path::Path,
    program: &str,
    args: &[&str],
    timeout: Option<Duration>,
) -> Result<CommandOutput, TransportError> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("running in {}: {}", dir.display(), describe(program, args));

    let fut = cmd.output();
    let output = match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| TransportError::Timeout(describe(program, args)))??,
        None => fut.await?,
    };

    Ok(CommandOutput {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Spawn a command and forward stdout and stderr to the sink in small
/// chunks as they arrive. Returns the exit code.
pub async fn stream_command(
    program: &str,
    args: &[&str],
    sink: &LogSink,
) -> Result<Option<i32>, TransportError> {
    stream_command_in(None, program, args, sink).await
}

/// `stream_command` with an optional working directory.
pub async fn stream_command_in(
    dir: Option<&std::path::Path>,
    program: &str,
    args: &[&str],
    sink: &LogSink,
) -> Result<Option<i32>, TransportError> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(d) = dir {
        cmd.current_dir(d);
    }

    debug!("streaming: {}", describe(program, args));

    let mut child = cmd.spawn()?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let mut readers = Vec::new();
    if let Some(mut out) = stdout {
        let sink = sink.clone();
        readers.push(tokio::spawn(async move {
            let mut buf = [0u8; STREAM_CHUNK];
            while let Ok(n) = out.read(&mut buf).await {
                if n == 0 {
                    break;
                }
                sink.send(String::from_utf8_lossy(&buf[..n]).into_owned());
            }
        }));
    }
    if let Some(mut err) = stderr {
        let sink = sink.clone();
        readers.push(tokio::spawn(async move {
            let mut buf = [0u8; STREAM_CHUNK];
            while let Ok(n) = err.read(&mut buf).await {
                if n == 0 {
                    break;
                }
                sink.send(String::from_utf8_lossy(&buf[..n]).into_owned());
            }
        }));
    }

    let status = child.wait().await?;
    for r in readers {
        let _ = r.await;
    }

    Ok(status.code())
}
