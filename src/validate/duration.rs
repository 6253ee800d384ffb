//! Duration grammar shared by group intervals and alert `for` periods.
//!
//! Accepted: `[<n>y][<n>w][<n>d][<n>h][<n>m][<n>s][<n>ms]` in that order,
//! the literal `0`, or the empty string (zero / unset).

use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:([0-9]+)y)?(?:([0-9]+)w)?(?:([0-9]+)d)?(?:([0-9]+)h)?(?:([0-9]+)m)?(?:([0-9]+)s)?(?:([0-9]+)ms)?$")
        .expect("duration pattern is a valid regex")
});

const MS_PER_UNIT: [u64; 7] = [
    365 * 24 * 60 * 60 * 1000, // y
    7 * 24 * 60 * 60 * 1000,   // w
    24 * 60 * 60 * 1000,       // d
    60 * 60 * 1000,            // h
    60 * 1000,                 // m
    1000,                      // s
    1,                         // ms
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationError {
    #[error("not a valid duration string: {0:?}")]
    Malformed(String),
    #[error("duration out of range: {0:?}")]
    Overflow(String),
}

pub fn parse_duration(s: &str) -> Result<Duration, DurationError> {
    if s.is_empty() || s == "0" {
        return Ok(Duration::ZERO);
    }

    let caps = DURATION_RE
        .captures(s)
        .ok_or_else(|| DurationError::Malformed(s.to_string()))?;

    let mut total_ms: u64 = 0;
    for (i, unit_ms) in MS_PER_UNIT.iter().enumerate() {
        let Some(m) = caps.get(i + 1) else {
            continue;
        };
        let n: u64 = m
            .as_str()
            .parse()
            .map_err(|_| DurationError::Overflow(s.to_string()))?;
        total_ms = n
            .checked_mul(*unit_ms)
            .and_then(|v| total_ms.checked_add(v))
            .ok_or_else(|| DurationError::Overflow(s.to_string()))?;
    }

    // Values past i64 milliseconds are not representable by the rule engine.
    if total_ms > i64::MAX as u64 {
        return Err(DurationError::Overflow(s.to_string()));
    }

    Ok(Duration::from_millis(total_ms))
}
