//! Human-readable duration text used by configuration and the control plane.
//!
//! Accepts compact unit groups such as `500ms`, `2m`, `1h30m` or `1.5h`.

use std::time::Duration;

use crate::{Error, Result};

const NANOS_PER_MILLI: f64 = 1_000_000.0;
const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// Parse duration text into a `Duration`.
///
/// Precision is milliseconds: finer values are rounded and anything below
/// `1ms` is rejected.
pub fn parse_duration(text: &str) -> Result<Duration> {
    let text = text.trim();
    if text.is_empty() {
        return Err(Error::InvalidArgument("empty duration".to_string()));
    }

    let mut total_nanos = 0f64;
    let mut rest = text;

    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(invalid(text, "expected a number"));
        }
        let (number, tail) = rest.split_at(number_len);
        let value: f64 = number
            .parse()
            .map_err(|_| invalid(text, "malformed number"))?;

        let unit_len = tail
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);

        let scale = match unit {
            "ms" => NANOS_PER_MILLI,
            "s" => NANOS_PER_SEC,
            "m" => 60.0 * NANOS_PER_SEC,
            "h" => 3600.0 * NANOS_PER_SEC,
            "" => return Err(invalid(text, "missing unit")),
            other => return Err(invalid(text, &format!("unknown unit '{}'", other))),
        };

        total_nanos += value * scale;
        rest = tail;
    }

    if !total_nanos.is_finite() || total_nanos > u64::MAX as f64 {
        return Err(invalid(text, "out of range"));
    }

    if total_nanos < NANOS_PER_MILLI {
        return Err(invalid(text, "must be at least 1ms"));
    }

    Ok(Duration::from_millis((total_nanos / NANOS_PER_MILLI).round() as u64))
}

/// Format a duration in the same compact form accepted by [`parse_duration`].
///
/// Precision is milliseconds.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let millis = duration.subsec_millis();

    if secs == 0 {
        return if millis == 0 {
            "0s".to_string()
        } else {
            format!("{}ms", millis)
        };
    }

    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{}h", hours));
    }
    if minutes > 0 {
        out.push_str(&format!("{}m", minutes));
    }
    if millis > 0 {
        let fraction = format!("{:03}", millis);
        out.push_str(&format!("{}.{}s", seconds, fraction.trim_end_matches('0')));
    } else if seconds > 0 {
        out.push_str(&format!("{}s", seconds));
    }
    out
}

fn invalid(text: &str, reason: &str) -> Error {
    Error::InvalidArgument(format!("invalid duration '{}': {}", text, reason))
}

/// Serde adapter storing a `Duration` as duration text.
pub mod text {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        super::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
