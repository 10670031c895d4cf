//! Wire contract between the supervisor and its worker processes.
//!
//! Input travels in one environment variable as JSON. On success the worker
//! writes exactly one JSON value to stdout between a start and an end
//! sentinel line; everything else on stdout is log noise. Failure is a
//! non-zero exit with diagnostics on stderr.

pub mod codec;
pub mod worker;

pub use codec::OutputCodec;
pub use worker::{read_input, write_framed, write_result};

/// Environment variable carrying the serialized job input.
pub const DEFAULT_INPUT_ENV: &str = "APIFY_INPUT";
/// Line written immediately before the result payload.
pub const DEFAULT_START_MARKER: &str = "__APIFY_OUTPUT_START__";
/// Line written immediately after the result payload.
pub const DEFAULT_END_MARKER: &str = "__APIFY_OUTPUT_END__";
/// Bytes of raw output kept in parse errors.
pub const DEFAULT_OUTPUT_TAIL_BYTES: usize = 500;

/// Lossy UTF-8 rendering of at most the last `max_bytes` of `bytes`.
pub(crate) fn tail_lossy(bytes: &[u8], max_bytes: usize) -> String {
    let start = bytes.len().saturating_sub(max_bytes);
    String::from_utf8_lossy(&bytes[start..]).into_owned()
}
