//! Supervision of isolated worker processes.
//!
//! One [`WorkerSupervisor::run`] call owns one child process: it hands the
//! job input over through an environment variable, drains stdout and stderr
//! while waiting for exit, and kills the child if the deadline fires first.
//! The deadline stops at process exit. A background descendant that keeps the
//! pipes open after that gets `drain_grace_ms` before the output read so far
//! is used. Exit status 0 is only a success once the codec has recovered a
//! result.
//!
//! ```text
//! SPAWNED -> RUNNING -> EXITED(code) -> PARSING -> RESULT | PARSE_FAILED
//!                    \-> KILLED_ON_TIMEOUT
//! SPAWN_FAILED
//! ```

use std::fmt;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, ChildStdout, Command};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SupervisorConfig;
use crate::core::{ConfigError, WorkerError};
use crate::protocol::OutputCodec;

const WORKER_LOG_TARGET: &str = "scrape_parking_lot::worker";

/// Lifecycle position of one worker invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationState {
    /// Process created.
    Spawned,
    /// Output is being collected.
    Running,
    /// Process exited on its own.
    Exited,
    /// Exit 0, decoding stdout.
    Parsing,
    /// A structured result was recovered.
    Result,
    /// Exit 0 but no result could be recovered.
    ParseFailed,
    /// Deadline fired and the process was killed.
    KilledOnTimeout,
    /// The process never started.
    SpawnFailed,
}

impl fmt::Display for InvocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Spawned => "spawned",
            Self::Running => "running",
            Self::Exited => "exited",
            Self::Parsing => "parsing",
            Self::Result => "result",
            Self::ParseFailed => "parse_failed",
            Self::KilledOnTimeout => "killed_on_timeout",
            Self::SpawnFailed => "spawn_failed",
        };
        f.write_str(s)
    }
}

/// Launches and supervises worker processes.
///
/// Cheap to clone; every `run` call spawns its own process and owns its own
/// buffers and timer.
#[derive(Debug, Clone)]
pub struct WorkerSupervisor {
    config: Arc<SupervisorConfig>,
    codec: OutputCodec,
}

impl WorkerSupervisor {
    /// Create a supervisor from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns the config's validation error.
    pub fn new(config: SupervisorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let codec = config.codec();
        Ok(Self {
            config: Arc::new(config),
            codec,
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Run one worker for `input` and return its structured result.
    ///
    /// # Errors
    ///
    /// - `WorkerError::InputEncode` if `input` cannot be serialized
    /// - `WorkerError::Spawn` if the process cannot be started
    /// - `WorkerError::Timeout` if the deadline elapsed (the process is killed)
    /// - `WorkerError::Exit` for a non-zero exit or death by signal
    /// - `WorkerError::OutputParse` for exit 0 without a recoverable result
    /// - `WorkerError::Io` if reading the pipes or waiting fails
    pub async fn run<I>(&self, input: &I) -> Result<Value, WorkerError>
    where
        I: Serialize + ?Sized,
    {
        let payload = serde_json::to_string(input).map_err(WorkerError::InputEncode)?;
        let invocation = Uuid::new_v4();
        let deadline = self.config.deadline();

        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args)
            .envs(&self.config.runtime_env)
            .env(&self.config.input_env_var, &payload)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        let started = Instant::now();
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                error!(
                    %invocation,
                    program = %self.config.program,
                    state = %InvocationState::SpawnFailed,
                    error = %source,
                    "failed to spawn worker"
                );
                return Err(WorkerError::Spawn {
                    program: self.config.program.clone(),
                    source,
                });
            }
        };
        info!(
            %invocation,
            pid = ?child.id(),
            program = %self.config.program,
            input_bytes = payload.len(),
            deadline_ms = self.config.deadline_ms,
            state = %InvocationState::Spawned,
            "worker spawned"
        );

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        debug!(%invocation, state = %InvocationState::Running, "collecting worker output");

        let mut captured = Vec::new();
        let mut stderr_buf = Vec::new();
        let status = {
            let readers = async {
                tokio::try_join!(
                    read_stdout(stdout, &self.config.log_markers, invocation, &mut captured),
                    read_stderr_tail(
                        stderr,
                        self.config.stderr_tail_bytes,
                        invocation,
                        &mut stderr_buf
                    ),
                )
            };
            tokio::pin!(readers);

            // The deadline covers the process only; it is disarmed on exit.
            let (waited, drained) = {
                let wait = tokio::time::timeout(deadline, child.wait());
                tokio::pin!(wait);
                let mut drained = None;
                loop {
                    tokio::select! {
                        waited = &mut wait => break (waited, drained),
                        out = &mut readers, if drained.is_none() => drained = Some(out),
                    }
                }
            };

            let Ok(status) = waited else {
                error!(
                    %invocation,
                    deadline_ms = self.config.deadline_ms,
                    state = %InvocationState::KilledOnTimeout,
                    "worker deadline exceeded, killing process"
                );
                if let Err(e) = child.kill().await {
                    warn!(%invocation, error = %e, "failed to kill worker");
                }
                return Err(WorkerError::Timeout { deadline });
            };
            let status = status?;

            let drained = match drained {
                Some(out) => Some(out),
                None => tokio::time::timeout(self.config.drain_grace(), &mut readers)
                    .await
                    .ok(),
            };
            match drained {
                Some(out) => {
                    out?;
                }
                None => warn!(
                    %invocation,
                    grace_ms = self.config.drain_grace_ms,
                    "worker exited but its output pipes stayed open, using output read so far"
                ),
            }
            status
        };
        let stdout = captured;
        let stderr_tail = String::from_utf8_lossy(&stderr_buf).trim_end().to_string();

        let elapsed_ms = started.elapsed().as_millis();
        info!(
            %invocation,
            code = ?status.code(),
            elapsed_ms,
            stdout_bytes = stdout.len(),
            state = %InvocationState::Exited,
            "worker exited"
        );

        if !status.success() {
            let code = status.code();
            let signal = exit_signal(status);
            error!(%invocation, ?code, ?signal, stderr = %stderr_tail, "worker failed");
            return Err(WorkerError::Exit {
                code,
                signal,
                stderr_tail,
            });
        }

        debug!(%invocation, state = %InvocationState::Parsing, "decoding worker output");
        match self.codec.decode(&stdout) {
            Ok(value) => {
                info!(%invocation, state = %InvocationState::Result, "worker result parsed");
                Ok(value)
            }
            Err(e) => {
                error!(
                    %invocation,
                    reason = %e.reason,
                    output_tail = %e.output_tail,
                    state = %InvocationState::ParseFailed,
                    "failed to parse worker output"
                );
                Err(e.into())
            }
        }
    }
}

async fn read_stdout(
    stdout: Option<ChildStdout>,
    markers: &[String],
    invocation: Uuid,
    captured: &mut Vec<u8>,
) -> std::io::Result<()> {
    let Some(stdout) = stdout else {
        return Ok(());
    };
    let mut reader = BufReader::new(stdout);
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            break;
        }
        captured.extend_from_slice(&line);
        let text = String::from_utf8_lossy(&line);
        if is_operator_line(&text, markers) {
            info!(target: WORKER_LOG_TARGET, %invocation, "{}", text.trim_end());
        }
    }
    Ok(())
}

/// Stdout lines worth surfacing to operators; everything else is noise.
fn is_operator_line(line: &str, markers: &[String]) -> bool {
    markers.iter().any(|m| !m.is_empty() && line.contains(m.as_str()))
}

async fn read_stderr_tail(
    stderr: Option<ChildStderr>,
    max_bytes: usize,
    invocation: Uuid,
    tail: &mut Vec<u8>,
) -> std::io::Result<()> {
    let Some(stderr) = stderr else {
        return Ok(());
    };
    let mut reader = BufReader::new(stderr);
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            break;
        }
        warn!(
            target: WORKER_LOG_TARGET,
            %invocation,
            "stderr: {}",
            String::from_utf8_lossy(&line).trim_end()
        );
        tail.extend_from_slice(&line);
        if tail.len() > max_bytes {
            let excess = tail.len() - max_bytes;
            tail.drain(..excess);
        }
    }
    Ok(())
}

#[cfg(unix)]
fn exit_signal(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: ExitStatus) -> Option<i32> {
    None
}
