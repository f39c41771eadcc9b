//! Child process primitives: capture and stream-to-log, with timeouts.
//!
//! The runner is transport only. It never interprets command output; callers
//! decide what an exit code means.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct CaptureOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub timed_out: bool,
}

impl CaptureOutput {
    pub fn exit_code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }

    /// Uniform report for a failed process: argv, exit code, both streams.
    pub fn failure_report(&self, argv: &str) -> String {
        format!(
            "command `{argv}` exited with code {:?}\nstdout:\n{}\nstderr:\n{}",
            self.status.code(),
            String::from_utf8_lossy(&self.stdout).trim(),
            String::from_utf8_lossy(&self.stderr).trim(),
        )
    }

    /// On-failure policy "raise": error unless the exit status is zero.
    pub fn ensure_success(&self, argv: &str) -> Result<()> {
        if self.timed_out {
            bail!("command `{argv}` timed out");
        }
        if !self.status.success() {
            bail!("{}", self.failure_report(argv));
        }
        Ok(())
    }
}

/// Status of a streamed child process.
#[derive(Debug)]
pub struct StreamOutput {
    pub status: ExitStatus,
    pub timed_out: bool,
}

impl StreamOutput {
    pub fn exit_code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }
}

/// Run a command and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is drained on reader threads while the child runs. When `timeout`
/// elapses the child is killed and `timed_out` is set; the caller sees the
/// post-kill exit status.
pub fn run_capture(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Option<Duration>,
) -> Result<CaptureOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    let mut child = cmd.spawn().context("spawn command")?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout_handle = thread::spawn(move || read_to_end(stdout));
    let stderr_handle = thread::spawn(move || read_to_end(stderr));

    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        child_stdin.write_all(input).context("write stdin")?;
    }

    let (status, timed_out) = wait_with_timeout(&mut child, timeout)?;

    let stdout = join_reader(stdout_handle).context("join stdout")?;
    let stderr = join_reader(stderr_handle).context("join stderr")?;

    Ok(CaptureOutput {
        status,
        stdout,
        stderr,
        timed_out,
    })
}

/// Run a command with stdout/stderr mirrored to a log file.
///
/// `header` is written to the log before the child starts; the two streams
/// are interleaved in arrival order.
pub fn run_stream_to_log(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    log_path: &Path,
    header: &str,
    timeout: Option<Duration>,
) -> Result<StreamOutput> {
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create log dir {}", parent.display()))?;
    }
    let mut log = File::options()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("open log {}", log_path.display()))?;
    log.write_all(header.as_bytes())
        .with_context(|| format!("write log header {}", log_path.display()))?;
    let log = Arc::new(Mutex::new(log));

    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    let mut child = cmd.spawn().context("spawn command")?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout_log = Arc::clone(&log);
    let stderr_log = Arc::clone(&log);
    let stdout_handle = thread::spawn(move || mirror_to_log(stdout, stdout_log));
    let stderr_handle = thread::spawn(move || mirror_to_log(stderr, stderr_log));

    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        child_stdin.write_all(input).context("write stdin")?;
    }

    let (status, timed_out) = wait_with_timeout(&mut child, timeout)?;

    join_mirror(stdout_handle).context("join stdout")?;
    join_mirror(stderr_handle).context("join stderr")?;

    Ok(StreamOutput { status, timed_out })
}

fn wait_with_timeout(
    child: &mut std::process::Child,
    timeout: Option<Duration>,
) -> Result<(ExitStatus, bool)> {
    match timeout {
        None => Ok((child.wait().context("wait for command")?, false)),
        Some(limit) => match child.wait_timeout(limit).context("wait for command")? {
            Some(status) => Ok((status, false)),
            None => {
                child.kill().context("kill command")?;
                let status = child.wait().context("wait command after kill")?;
                Ok((status, true))
            }
        },
    }
}

fn read_to_end<R: Read>(mut reader: R) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).context("read output")?;
    Ok(buf)
}

fn mirror_to_log<R: Read>(mut reader: R, log: Arc<Mutex<File>>) -> Result<()> {
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            return Ok(());
        }
        let mut log = log.lock().expect("log mutex poisoned");
        log.write_all(&chunk[..n]).context("write log")?;
    }
}

fn join_reader(handle: thread::JoinHandle<Result<Vec<u8>>>) -> Result<Vec<u8>> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn join_mirror(handle: thread::JoinHandle<Result<()>>) -> Result<()> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output mirror thread panicked")),
    }
}
