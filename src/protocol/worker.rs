//! Worker-side half of the protocol: read the job input, emit the result.

use std::io::{self, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use super::{DEFAULT_END_MARKER, DEFAULT_START_MARKER};

/// Read the job input from environment variable `var`.
///
/// A missing or unparsable variable yields `T::default()` so a worker can
/// still run with its built-in defaults.
pub fn read_input<T>(var: &str) -> T
where
    T: DeserializeOwned + Default,
{
    let Ok(raw) = std::env::var(var) else {
        warn!(var, "worker input variable missing, using defaults");
        return T::default();
    };
    match serde_json::from_str(&raw) {
        Ok(input) => input,
        Err(e) => {
            warn!(var, error = %e, "worker input variable invalid, using defaults");
            T::default()
        }
    }
}

/// Write `value` framed by the default sentinels and flush.
///
/// # Errors
///
/// Propagates serialization and write failures.
pub fn write_result<W, T>(out: &mut W, value: &T) -> io::Result<()>
where
    W: Write,
    T: Serialize + ?Sized,
{
    write_framed(out, value, DEFAULT_START_MARKER, DEFAULT_END_MARKER)
}

/// Write `value` as one JSON line between `start_marker` and `end_marker`.
///
/// # Errors
///
/// Propagates serialization and write failures.
pub fn write_framed<W, T>(out: &mut W, value: &T, start_marker: &str, end_marker: &str) -> io::Result<()>
where
    W: Write,
    T: Serialize + ?Sized,
{
    let payload = serde_json::to_string(value)?;
    writeln!(out, "{start_marker}")?;
    writeln!(out, "{payload}")?;
    writeln!(out, "{end_marker}")?;
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::OutputCodec;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct Input {
        #[serde(default)]
        sites: Vec<String>,
    }

    #[test]
    fn framed_output_decodes_amid_logs() {
        let mut out = Vec::new();
        writeln!(out, "📊 scraped 3 articles").unwrap();
        write_result(&mut out, &json!({"totalResults": 3})).unwrap();
        writeln!(out, "👋 exiting").unwrap();

        let value = OutputCodec::default().decode(&out).unwrap();
        assert_eq!(value, json!({"totalResults": 3}));
    }

    #[test]
    fn missing_input_falls_back_to_default() {
        let input: Input = read_input("SCRAPE_PARKING_LOT_TEST_UNSET_INPUT");
        assert_eq!(input, Input::default());
    }
}
