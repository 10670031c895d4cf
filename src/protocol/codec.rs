//! Recovers the structured result from a worker's mixed stdout stream.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use super::{tail_lossy, DEFAULT_END_MARKER, DEFAULT_OUTPUT_TAIL_BYTES, DEFAULT_START_MARKER};
use crate::core::OutputParseError;

static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1B\[[0-9;]*[a-zA-Z]")
        .unwrap_or_else(|err| panic!("invalid ANSI_ESCAPE regex: {err}"))
});

/// Remove terminal color/cursor escape sequences.
pub fn strip_ansi(text: &str) -> std::borrow::Cow<'_, str> {
    ANSI_ESCAPE.replace_all(text, "")
}

/// Decoder for sentinel-framed worker output.
///
/// The sentinel pair is the only supported framing. The last-JSON-line
/// fallback exists for workers that predate the sentinels and must be
/// enabled explicitly; it logs a warning every time it is used because it
/// can pick up an unrelated JSON-shaped log line.
#[derive(Debug, Clone)]
pub struct OutputCodec {
    start_marker: String,
    end_marker: String,
    line_fallback: bool,
    tail_bytes: usize,
}

impl Default for OutputCodec {
    fn default() -> Self {
        Self::new(DEFAULT_START_MARKER, DEFAULT_END_MARKER)
    }
}

impl OutputCodec {
    /// Sentinel-only codec with custom markers.
    pub fn new(start_marker: impl Into<String>, end_marker: impl Into<String>) -> Self {
        Self {
            start_marker: start_marker.into(),
            end_marker: end_marker.into(),
            line_fallback: false,
            tail_bytes: DEFAULT_OUTPUT_TAIL_BYTES,
        }
    }

    /// Default markers with the last-JSON-line fallback enabled.
    pub fn lenient() -> Self {
        Self::default().with_line_fallback(true)
    }

    /// Enable or disable the last-JSON-line fallback.
    #[must_use]
    pub const fn with_line_fallback(mut self, enabled: bool) -> Self {
        self.line_fallback = enabled;
        self
    }

    /// Bytes of raw output carried in parse errors.
    #[must_use]
    pub const fn with_tail_bytes(mut self, tail_bytes: usize) -> Self {
        self.tail_bytes = tail_bytes;
        self
    }

    /// Whether the fallback is enabled.
    pub const fn line_fallback(&self) -> bool {
        self.line_fallback
    }

    /// Extract the single JSON result from `raw`.
    ///
    /// # Errors
    ///
    /// Returns `OutputParseError` when no framed payload (or, with the
    /// fallback, no JSON-looking line) exists, or it is not valid JSON.
    pub fn decode(&self, raw: &[u8]) -> Result<Value, OutputParseError> {
        let text = String::from_utf8_lossy(raw);
        let clean = strip_ansi(&text);

        let candidate = match self.framed_payload(&clean) {
            Some(payload) => {
                debug!(bytes = payload.len(), "found sentinel-framed payload");
                payload
            }
            None if self.line_fallback => match last_json_line(&clean) {
                Some(line) => {
                    warn!(
                        start_marker = %self.start_marker,
                        "no sentinel pair in worker output, using last JSON-looking line"
                    );
                    line
                }
                None => return Err(self.error(raw, "no valid JSON output found")),
            },
            None => return Err(self.error(raw, "no sentinel-framed result found")),
        };

        if candidate.is_empty() {
            return Err(self.error(raw, "empty result payload"));
        }

        serde_json::from_str(candidate).map_err(|e| self.error(raw, &e.to_string()))
    }

    /// Trimmed text between the first start marker and the first end marker
    /// after it.
    fn framed_payload<'a>(&self, text: &'a str) -> Option<&'a str> {
        let start = text.find(&self.start_marker)? + self.start_marker.len();
        let len = text[start..].find(&self.end_marker)?;
        Some(text[start..start + len].trim())
    }

    fn error(&self, raw: &[u8], reason: &str) -> OutputParseError {
        OutputParseError {
            reason: reason.to_string(),
            output_tail: tail_lossy(raw, self.tail_bytes),
        }
    }
}

fn last_json_line(text: &str) -> Option<&str> {
    text.lines()
        .rev()
        .map(str::trim)
        .find(|line| line.starts_with('{'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn framed_payload_ignores_surrounding_noise() {
        let raw = "🚀 starting\n{\"log\":true}\n__APIFY_OUTPUT_START__\n{\"a\":1}\n__APIFY_OUTPUT_END__\n✅ done\n";
        let value = OutputCodec::default().decode(raw.as_bytes()).unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn sentinels_win_over_fallback() {
        let raw = "__APIFY_OUTPUT_START__\n{\"a\":1}\n__APIFY_OUTPUT_END__\n{\"b\":2}\n";
        let value = OutputCodec::lenient().decode(raw.as_bytes()).unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn strip_ansi_removes_color_and_cursor_codes() {
        assert_eq!(strip_ansi("\x1b[1;31mERROR\x1b[0m page 2\x1b[2K"), "ERROR page 2");
        assert!(matches!(strip_ansi("plain line"), std::borrow::Cow::Borrowed("plain line")));
    }

    #[test]
    fn ansi_codes_are_stripped_before_framing() {
        let raw = "\x1b[32minfo\x1b[0m ready __APIFY_OUTPUT_START__\x1b[0m\n{\"ok\":true}\n__APIFY_OUTPUT_END__\n";
        let value = OutputCodec::default().decode(raw.as_bytes()).unwrap();
        assert_eq!(value, json!({"ok": true}));
    }

    #[test]
    fn fallback_takes_last_json_line() {
        let raw = "booting\n{\"first\":1}\nnoise\n  {\"second\":2}\nbye\n";
        let value = OutputCodec::lenient().decode(raw.as_bytes()).unwrap();
        assert_eq!(value, json!({"second": 2}));
    }

    #[test]
    fn fallback_is_off_by_default() {
        let raw = "{\"second\":2}\n";
        let err = OutputCodec::default().decode(raw.as_bytes()).unwrap_err();
        assert_eq!(err.reason, "no sentinel-framed result found");
    }

    #[test]
    fn start_without_end_uses_fallback() {
        let raw = "__APIFY_OUTPUT_START__\n{\"partial\":true}\n";
        let value = OutputCodec::lenient().decode(raw.as_bytes()).unwrap();
        assert_eq!(value, json!({"partial": true}));
    }

    #[test]
    fn no_json_is_an_error() {
        let err = OutputCodec::lenient()
            .decode(b"just some logs\nnothing here\n")
            .unwrap_err();
        assert_eq!(err.reason, "no valid JSON output found");
        assert!(err.output_tail.contains("nothing here"));
    }

    #[test]
    fn malformed_framed_payload_is_an_error() {
        let raw = "__APIFY_OUTPUT_START__\n{\"a\":\n__APIFY_OUTPUT_END__\n";
        assert!(OutputCodec::lenient().decode(raw.as_bytes()).is_err());
    }

    #[test]
    fn empty_framed_payload_is_an_error() {
        let raw = "__APIFY_OUTPUT_START__\n\n__APIFY_OUTPUT_END__\n";
        let err = OutputCodec::default().decode(raw.as_bytes()).unwrap_err();
        assert_eq!(err.reason, "empty result payload");
    }

    #[test]
    fn error_tail_is_bounded() {
        let raw = "x".repeat(2000);
        let err = OutputCodec::default()
            .with_tail_bytes(64)
            .decode(raw.as_bytes())
            .unwrap_err();
        assert_eq!(err.output_tail.len(), 64);
    }

    #[test]
    fn custom_markers() {
        let codec = OutputCodec::new("<<<", ">>>");
        let value = codec.decode(b"<<<\n[1,2,3]\n>>>\n").unwrap();
        assert_eq!(value, json!([1, 2, 3]));
    }
}
