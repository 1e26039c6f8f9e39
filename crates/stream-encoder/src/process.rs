//! Child process handling for ffmpeg invocations.

use std::io::{BufReader, Read};
use std::path::Path;
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use capstan_common::{CapstanError, CapstanResult};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A spawned ffmpeg process with its stderr drained in the background.
///
/// Dropping a process that is still running kills it.
pub struct ManagedProcess {
    label: &'static str,
    child: Child,
    stderr_task: Option<JoinHandle<String>>,
    exited: bool,
}

impl ManagedProcess {
    /// Spawn `program` with `args`. When `pipe_stdin` is set the child's
    /// stdin is returned for streaming input.
    pub fn spawn(
        label: &'static str,
        program: &Path,
        args: &[String],
        pipe_stdin: bool,
    ) -> CapstanResult<(Self, Option<ChildStdin>)> {
        tracing::debug!(process = label, program = %program.display(), ?args, "Spawning process");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(if pipe_stdin {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            CapstanError::encoder_unavailable(format!(
                "Failed to start {label} ({}): {e}",
                program.display()
            ))
        })?;

        let stdin = child.stdin.take();
        let stderr_task = child.stderr.take().map(|stderr| {
            // Drain stderr concurrently so the child never blocks on a full pipe.
            std::thread::spawn(move || -> String {
                let mut reader = BufReader::new(stderr);
                let mut output = String::new();
                match reader.read_to_string(&mut output) {
                    Ok(_) => output,
                    Err(err) => format!("<failed to read stderr: {err}>"),
                }
            })
        });

        tracing::info!(process = label, pid = child.id(), "Process started");

        Ok((
            Self {
                label,
                child,
                stderr_task,
                exited: false,
            },
            stdin,
        ))
    }

    /// Wait for the process to exit.
    ///
    /// With a timeout, a process still running at the deadline is killed and
    /// `ProcessTimeout` is returned.
    pub async fn wait(&mut self, timeout: Option<Duration>) -> CapstanResult<ExitStatus> {
        let started = Instant::now();
        loop {
            if let Some(status) = self.child.try_wait()? {
                self.exited = true;
                tracing::debug!(process = self.label, %status, elapsed_ms = started.elapsed().as_millis() as u64, "Process exited");
                return Ok(status);
            }

            if let Some(limit) = timeout {
                if started.elapsed() >= limit {
                    tracing::warn!(
                        process = self.label,
                        timeout_secs = limit.as_secs(),
                        "Process exceeded wait limit, killing"
                    );
                    self.kill();
                    return Err(CapstanError::ProcessTimeout {
                        process: self.label.to_string(),
                        timeout_secs: limit.as_secs(),
                    });
                }
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Collected stderr output. Only complete once the process has exited.
    pub fn take_stderr(&mut self) -> String {
        match self.stderr_task.take() {
            Some(task) => task
                .join()
                .unwrap_or_else(|_| "<stderr reader panicked>".to_string()),
            None => String::new(),
        }
    }

    /// Kill the process if it is still running and reap it.
    pub fn kill(&mut self) {
        if self.exited {
            return;
        }
        if let Err(e) = self.child.kill() {
            tracing::debug!(process = self.label, error = %e, "Kill failed, process likely exited");
        }
        let _ = self.child.wait();
        self.exited = true;
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        if !self.exited {
            if let Ok(None) = self.child.try_wait() {
                tracing::warn!(process = self.label, pid = self.child.id(), "Killing orphaned process");
            }
            self.kill();
        }
    }
}

/// Run a process to completion, logging its stderr on failure.
pub async fn run_to_completion(
    label: &'static str,
    program: &Path,
    args: &[String],
    timeout: Option<Duration>,
) -> CapstanResult<ExitStatus> {
    let (mut process, _) = ManagedProcess::spawn(label, program, args, false)?;
    let status = process.wait(timeout).await?;
    let stderr = process.take_stderr();
    if !status.success() {
        tracing::warn!(process = label, %status, stderr = %stderr.trim(), "Process failed");
    } else if !stderr.trim().is_empty() {
        tracing::debug!(process = label, stderr = %stderr.trim(), "Process output");
    }
    Ok(status)
}
