//! Queue, supervisor and service configuration structures.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::ConfigError;
use crate::protocol::{
    OutputCodec, DEFAULT_END_MARKER, DEFAULT_INPUT_ENV, DEFAULT_OUTPUT_TAIL_BYTES,
    DEFAULT_START_MARKER,
};

/// Default hard deadline for one worker invocation.
pub const DEFAULT_DEADLINE_MS: u64 = 300_000;
/// Default heap ceiling handed to the worker runtime.
pub const DEFAULT_HEAP_LIMIT_MB: u32 = 1024;
/// Default time allowed to finish reading output after the worker exits.
pub const DEFAULT_DRAIN_GRACE_MS: u64 = 2_000;
/// Default bytes of stderr retained for diagnostics.
pub const DEFAULT_STDERR_TAIL_BYTES: usize = 4096;

/// Job queue configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum jobs running at once.
    pub max_concurrent: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { max_concurrent: 1 }
    }
}

impl QueueConfig {
    /// Validate queue configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` when `max_concurrent` is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// How worker processes are launched and supervised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Executable to launch.
    pub program: String,
    /// Arguments passed to the executable. Never carries the job input.
    pub args: Vec<String>,
    /// Working directory for the worker; inherits ours when unset.
    pub working_dir: Option<PathBuf>,
    /// Environment variable that carries the JSON job input.
    pub input_env_var: String,
    /// Extra environment for the worker runtime (heap ceiling and the like).
    pub runtime_env: BTreeMap<String, String>,
    /// Hard wall-clock deadline from spawn, in milliseconds.
    pub deadline_ms: u64,
    /// After exit, how long to keep reading pipes a descendant still holds.
    pub drain_grace_ms: u64,
    /// Bytes of stderr kept for error reports.
    pub stderr_tail_bytes: usize,
    /// Bytes of stdout kept in parse errors.
    pub output_tail_bytes: usize,
    /// Line preceding the result payload.
    pub start_marker: String,
    /// Line following the result payload.
    pub end_marker: String,
    /// Stdout lines containing any of these are logged.
    pub log_markers: Vec<String>,
    /// Accept the last JSON-looking line when the sentinels are missing.
    pub line_fallback: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        let mut runtime_env = BTreeMap::new();
        runtime_env.insert("NODE_OPTIONS".to_string(), heap_limit_option(DEFAULT_HEAP_LIMIT_MB));
        runtime_env.insert("NODE_ENV".to_string(), "production".to_string());
        Self {
            program: "node".to_string(),
            args: vec!["apify-actor-lib/main-local.js".to_string()],
            working_dir: None,
            input_env_var: DEFAULT_INPUT_ENV.to_string(),
            runtime_env,
            deadline_ms: DEFAULT_DEADLINE_MS,
            drain_grace_ms: DEFAULT_DRAIN_GRACE_MS,
            stderr_tail_bytes: DEFAULT_STDERR_TAIL_BYTES,
            output_tail_bytes: DEFAULT_OUTPUT_TAIL_BYTES,
            start_marker: DEFAULT_START_MARKER.to_string(),
            end_marker: DEFAULT_END_MARKER.to_string(),
            log_markers: ["🚀", "✅", "❌", "📊"].map(String::from).to_vec(),
            line_fallback: false,
        }
    }
}

fn heap_limit_option(mb: u32) -> String {
    format!("--max-old-space-size={mb}")
}

impl SupervisorConfig {
    /// Config launching `program` with `args` and default supervision.
    pub fn for_program<I, A>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Override the deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the worker heap ceiling through `NODE_OPTIONS`.
    #[must_use]
    pub fn with_heap_limit_mb(mut self, mb: u32) -> Self {
        self.runtime_env
            .insert("NODE_OPTIONS".to_string(), heap_limit_option(mb));
        self
    }

    /// Enable or disable the last-JSON-line fallback.
    #[must_use]
    pub const fn with_line_fallback(mut self, enabled: bool) -> Self {
        self.line_fallback = enabled;
        self
    }

    /// Deadline as a `Duration`.
    pub const fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    /// Post-exit drain grace as a `Duration`.
    pub const fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }

    /// Codec matching the configured framing.
    pub fn codec(&self) -> OutputCodec {
        OutputCodec::new(self.start_marker.clone(), self.end_marker.clone())
            .with_line_fallback(self.line_fallback)
            .with_tail_bytes(self.output_tail_bytes)
    }

    /// Validate supervisor configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` describing the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.program.trim().is_empty() {
            return Err(ConfigError::Invalid("program must not be empty".into()));
        }
        if self.input_env_var.is_empty() || self.input_env_var.contains('=') {
            return Err(ConfigError::Invalid(format!(
                "input_env_var `{}` is not a valid variable name",
                self.input_env_var
            )));
        }
        if self.deadline_ms == 0 {
            return Err(ConfigError::Invalid(
                "deadline_ms must be greater than 0".into(),
            ));
        }
        if self.start_marker.is_empty() || self.end_marker.is_empty() {
            return Err(ConfigError::Invalid("sentinel markers must not be empty".into()));
        }
        if self.start_marker == self.end_marker {
            return Err(ConfigError::Invalid(
                "start and end markers must differ".into(),
            ));
        }
        Ok(())
    }
}

/// Root service configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Admission settings.
    pub queue: QueueConfig,
    /// Worker launch settings.
    pub supervisor: SupervisorConfig,
}

impl ServiceConfig {
    /// Validate every section.
    ///
    /// # Errors
    ///
    /// Returns the first section's `ConfigError`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.queue.validate()?;
        self.supervisor.validate()
    }

    /// Parse service configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` or `ConfigError::Invalid`.
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(input)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults overridden by `SCRAPE_*` variables, after loading `.env`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Env` for an unparsable override, or the
    /// validation error of the result.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "loaded .env");
        }
        Self::default().with_overrides(|var| std::env::var(var).ok())
    }

    /// Apply `SCRAPE_*` overrides read through `lookup`, then validate.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Env` for an unparsable override, or the
    /// validation error of the result.
    pub fn with_overrides<L>(mut self, lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SCRAPE_MAX_CONCURRENT") {
            self.queue.max_concurrent = parse_var("SCRAPE_MAX_CONCURRENT", &v)?;
        }
        if let Some(v) = lookup("SCRAPE_WORKER_PROGRAM") {
            self.supervisor.program = v;
        }
        if let Some(v) = lookup("SCRAPE_WORKER_ARGS") {
            self.supervisor.args = v.split_whitespace().map(String::from).collect();
        }
        if let Some(v) = lookup("SCRAPE_WORKER_DIR") {
            self.supervisor.working_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("SCRAPE_DEADLINE_MS") {
            self.supervisor.deadline_ms = parse_var("SCRAPE_DEADLINE_MS", &v)?;
        }
        if let Some(v) = lookup("SCRAPE_HEAP_LIMIT_MB") {
            let mb: u32 = parse_var("SCRAPE_HEAP_LIMIT_MB", &v)?;
            self.supervisor = self.supervisor.with_heap_limit_mb(mb);
        }
        if let Some(v) = lookup("SCRAPE_LINE_FALLBACK") {
            self.supervisor.line_fallback = parse_var("SCRAPE_LINE_FALLBACK", &v)?;
        }
        self.validate()?;
        Ok(self)
    }
}

fn parse_var<T>(var: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Env {
        var: var.to_string(),
        reason: e.to_string(),
    })
}
