//! Wall-clock timestamps and latency measurement
//!
//! `X-Timestamp` is milliseconds since the Unix epoch; latency tracking uses
//! nanoseconds. Both come from the same clock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Nanoseconds since the Unix epoch
#[inline]
pub fn nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Milliseconds since the Unix epoch
#[inline]
pub fn timestamp_ms() -> u64 {
    nanos() / 1_000_000
}

/// Point in time with nanosecond resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    pub nanos: u64,
}

impl Timestamp {
    pub fn now() -> Self {
        Self { nanos: nanos() }
    }

    /// Exchange times are epoch milliseconds
    pub fn from_millis(millis: u64) -> Self {
        Self {
            nanos: millis.saturating_mul(1_000_000),
        }
    }

    pub fn as_millis(&self) -> u64 {
        self.nanos / 1_000_000
    }

    pub fn elapsed_micros(&self) -> u64 {
        nanos().saturating_sub(self.nanos) / 1_000
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        let secs = (self.nanos / 1_000_000_000) as i64;
        let subsec = (self.nanos % 1_000_000_000) as u32;
        DateTime::from_timestamp(secs, subsec).unwrap_or(DateTime::UNIX_EPOCH)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_datetime().format("%Y-%m-%d %H:%M:%S%.3f UTC"))
    }
}

/// Latency timer for one named operation
///
/// Reports at debug level exactly once: from [`PerfTimer::finish`] or on drop.
pub struct PerfTimer {
    name: Cow<'static, str>,
    started: Timestamp,
    done: bool,
}

impl PerfTimer {
    pub fn start(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            started: Timestamp::now(),
            done: false,
        }
    }

    pub fn elapsed_micros(&self) -> u64 {
        self.started.elapsed_micros()
    }

    /// Elapsed microseconds
    pub fn finish(mut self) -> u64 {
        let micros = self.elapsed_micros();
        self.report(micros);
        micros
    }

    fn report(&mut self, micros: u64) {
        self.done = true;
        tracing::debug!("⏱️  {} took {}μs", self.name, micros);
    }
}

impl Drop for PerfTimer {
    fn drop(&mut self) {
        if !self.done {
            let micros = self.elapsed_micros();
            self.report(micros);
        }
    }
}
