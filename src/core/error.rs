//! Error types for queue, supervisor, codec and configuration failures.

use std::time::Duration;

use thiserror::Error;

/// Failure surfaced through a [`JobHandle`](crate::core::JobHandle).
#[derive(Debug, Error)]
pub enum JobError<E> {
    /// The task ran and returned its own error, propagated verbatim.
    #[error(transparent)]
    Task(E),
    /// The task panicked while running.
    #[error("task panicked: {0}")]
    Panicked(String),
    /// The job was discarded from the backlog before it started.
    #[error("job cancelled before it started")]
    Cancelled,
}

impl<E> JobError<E> {
    /// Returns the task error if this failure came from the task itself.
    pub fn into_task_error(self) -> Option<E> {
        match self {
            Self::Task(e) => Some(e),
            Self::Panicked(_) | Self::Cancelled => None,
        }
    }

    /// `true` when the job never ran.
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// The worker exited 0 but no structured result could be recovered.
#[derive(Debug, Error)]
#[error("failed to parse worker output: {reason}")]
pub struct OutputParseError {
    /// What went wrong.
    pub reason: String,
    /// Last bytes of the raw output, for diagnostics.
    pub output_tail: String,
}

/// Failures of a single worker invocation.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The job input could not be serialized for the worker.
    #[error("failed to encode worker input: {0}")]
    InputEncode(#[source] serde_json::Error),
    /// The worker process could not be started.
    #[error("failed to spawn worker `{program}`: {source}")]
    Spawn {
        /// Program that was launched.
        program: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
    /// The worker ran but did not exit with status 0.
    #[error("worker exited with {}: {stderr_tail}", describe_exit(.code, .signal))]
    Exit {
        /// Exit code, if the process exited normally.
        code: Option<i32>,
        /// Terminating signal, if the process was killed by one.
        signal: Option<i32>,
        /// Tail of captured stderr.
        stderr_tail: String,
    },
    /// The deadline elapsed and the worker was force-killed.
    #[error("worker exceeded deadline of {}ms and was killed", .deadline.as_millis())]
    Timeout {
        /// Deadline that was exceeded.
        deadline: Duration,
    },
    /// Exit 0 without a recoverable result.
    #[error(transparent)]
    OutputParse(#[from] OutputParseError),
    /// Reading pipes or waiting on the process failed.
    #[error("worker i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    /// Stable identifier of the error kind for caller-facing reports.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InputEncode(_) => "input_encode",
            Self::Spawn { .. } => "worker_spawn",
            Self::Exit { .. } => "worker_exit",
            Self::Timeout { .. } => "worker_timeout",
            Self::OutputParse(_) => "output_parse",
            Self::Io(_) => "worker_io",
        }
    }
}

fn describe_exit(code: &Option<i32>, signal: &Option<i32>) -> String {
    match (*code, *signal) {
        (Some(code), _) => format!("code {code}"),
        (None, Some(signal)) => format!("signal {signal}"),
        (None, None) => "unknown status".to_string(),
    }
}

/// Invalid or unreadable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A value failed validation.
    #[error("invalid config: {0}")]
    Invalid(String),
    /// JSON config could not be parsed.
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
    /// An environment override could not be interpreted.
    #[error("environment variable `{var}` invalid: {reason}")]
    Env {
        /// Variable name.
        var: String,
        /// Why it was rejected.
        reason: String,
    },
    /// No async runtime was available to drive the queue.
    #[error("no tokio runtime available: {0}")]
    Runtime(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
