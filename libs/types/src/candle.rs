//! OHLCV candle types
//!
//! Candle boundaries are aligned to the Unix epoch in UTC, so a 5 minute
//! bucket always starts on a minute that is a multiple of five, a 6 hour
//! bucket at 00:00, 06:00, 12:00 or 18:00 and a daily bucket at midnight.

use std::fmt;
use std::str::FromStr;

use chrono::{SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::IntervalError;

const NANOS_PER_MINUTE: i64 = 60 * 1_000_000_000;

/// Supported candle intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Interval {
    /// 1 minute
    I1M,
    /// 5 minutes
    I5M,
    /// 15 minutes
    I15M,
    /// 1 hour
    I1H,
    /// 6 hours
    I6H,
    /// 1 day
    I1D,
}

impl Interval {
    /// Every supported interval, shortest first.
    pub const ALL: [Interval; 6] = [
        Interval::I1M,
        Interval::I5M,
        Interval::I15M,
        Interval::I1H,
        Interval::I6H,
        Interval::I1D,
    ];

    /// Name used in storage keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::I1M => "I1M",
            Interval::I5M => "I5M",
            Interval::I15M => "I15M",
            Interval::I1H => "I1H",
            Interval::I6H => "I6H",
            Interval::I1D => "I1D",
        }
    }

    /// Duration of this interval in nanoseconds.
    pub fn duration_nanos(&self) -> i64 {
        match self {
            Interval::I1M => NANOS_PER_MINUTE,
            Interval::I5M => 5 * NANOS_PER_MINUTE,
            Interval::I15M => 15 * NANOS_PER_MINUTE,
            Interval::I1H => 60 * NANOS_PER_MINUTE,
            Interval::I6H => 6 * 60 * NANOS_PER_MINUTE,
            Interval::I1D => 24 * 60 * NANOS_PER_MINUTE,
        }
    }

    /// Floor a Unix-nanosecond timestamp to the start of its bucket.
    pub fn round(&self, timestamp_nanos: i64) -> i64 {
        timestamp_nanos - timestamp_nanos.rem_euclid(self.duration_nanos())
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = IntervalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Interval::ALL
            .iter()
            .copied()
            .find(|iv| iv.as_str() == s)
            .ok_or_else(|| IntervalError::Unsupported(s.to_string()))
    }
}

/// A single OHLCV candle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    /// Bucket start, Unix nanos
    pub timestamp: i64,
    /// Bucket start as RFC 3339
    pub datetime: String,
    pub open: u64,
    pub high: u64,
    pub low: u64,
    pub close: u64,
    pub volume: u64,
    pub interval: Interval,
}

impl Candle {
    /// Create a candle for the bucket starting at `timestamp`, with every
    /// price set to `open_price`.
    pub fn new(timestamp: i64, open_price: u64, volume: u64, interval: Interval) -> Self {
        Self {
            timestamp,
            datetime: format_nanos(timestamp),
            open: open_price,
            high: open_price,
            low: open_price,
            close: open_price,
            volume,
            interval,
        }
    }

    /// Apply one trade to this candle.
    ///
    /// A candle without volume, or without an open price, carries the
    /// previous close only as a placeholder: the first trade replaces it.
    pub fn apply_trade(&mut self, price: u64, size: u64) {
        self.close = price;

        if self.volume == 0 || self.open == 0 {
            self.open = price;
            self.high = price;
            self.low = price;
        }
        if price < self.low || self.low == 0 {
            self.low = price;
        }
        if price > self.high {
            self.high = price;
        }

        self.volume += size;
    }

    /// Fold a later candle for the same bucket into this one.
    pub fn merge(&mut self, update: &Candle) {
        self.close = update.close;
        if update.low < self.low {
            self.low = update.low;
        }
        if update.high > self.high {
            self.high = update.high;
        }
        self.volume += update.volume;
    }

    /// Validate candle integrity (OHLCV invariants).
    pub fn is_valid(&self) -> bool {
        self.high >= self.open
            && self.high >= self.close
            && self.high >= self.low
            && self.low <= self.open
            && self.low <= self.close
    }
}

/// Format a Unix-nanosecond timestamp as RFC 3339 in UTC.
pub fn format_nanos(timestamp_nanos: i64) -> String {
    Utc.timestamp_nanos(timestamp_nanos)
        .to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // 2018-11-13T11:01:14Z
    const T0: i64 = 1_542_106_874_000_000_000;
    const SECOND: i64 = 1_000_000_000;
    const MINUTE: i64 = 60 * SECOND;
    const HOUR: i64 = 60 * MINUTE;

    #[test]
    fn test_round_each_interval() {
        assert_eq!(Interval::I1M.round(T0), T0 - 14 * SECOND);
        assert_eq!(Interval::I5M.round(T0), T0 - (MINUTE + 14 * SECOND));
        assert_eq!(Interval::I15M.round(T0), T0 - (MINUTE + 14 * SECOND));
        assert_eq!(Interval::I1H.round(T0), T0 - (MINUTE + 14 * SECOND));
        assert_eq!(Interval::I6H.round(T0), T0 - (5 * HOUR + MINUTE + 14 * SECOND));
        assert_eq!(Interval::I1D.round(T0), T0 - (11 * HOUR + MINUTE + 14 * SECOND));
    }

    #[test]
    fn test_interval_from_str() {
        assert_eq!("I15M".parse::<Interval>().unwrap(), Interval::I15M);
        assert!("I2M".parse::<Interval>().is_err());
    }

    #[test]
    fn test_candle_datetime() {
        let candle = Candle::new(Interval::I1M.round(T0), 100, 0, Interval::I1M);
        assert_eq!(candle.datetime, "2018-11-13T11:01:00Z");
    }

    #[test]
    fn test_apply_trade_merge_correctness() {
        let mut candle = Candle::new(T0, 100, 100, Interval::I1M);
        candle.apply_trade(150, 50);
        assert_eq!(candle.open, 100);
        assert_eq!(candle.high, 150);
        assert_eq!(candle.low, 100);
        assert_eq!(candle.close, 150);
        assert_eq!(candle.volume, 150);
    }

    #[test]
    fn test_apply_trade_replaces_placeholder_prices() {
        // Seeded with the previous close, no volume yet
        let mut candle = Candle::new(T0, 120, 0, Interval::I5M);
        candle.apply_trade(99, 10);
        assert_eq!(candle.open, 99);
        assert_eq!(candle.high, 99);
        assert_eq!(candle.low, 99);
        assert_eq!(candle.volume, 10);
        assert!(candle.is_valid());
    }

    #[test]
    fn test_merge_widens_and_accumulates() {
        let mut stored = Candle::new(T0, 100, 100, Interval::I1M);
        stored.high = 110;
        let mut update = Candle::new(T0, 90, 40, Interval::I1M);
        update.close = 95;
        stored.merge(&update);
        assert_eq!(stored.open, 100);
        assert_eq!(stored.high, 110);
        assert_eq!(stored.low, 90);
        assert_eq!(stored.close, 95);
        assert_eq!(stored.volume, 140);
    }

    proptest! {
        #[test]
        fn prop_round_is_idempotent(ts in 0i64..4_102_444_800_000_000_000, idx in 0usize..6) {
            let iv = Interval::ALL[idx];
            prop_assert_eq!(iv.round(iv.round(ts)), iv.round(ts));
        }

        #[test]
        fn prop_round_is_monotonic(a in 0i64..4_102_444_800_000_000_000, b in 0i64..4_102_444_800_000_000_000, idx in 0usize..6) {
            let iv = Interval::ALL[idx];
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(iv.round(lo) <= iv.round(hi));
        }

        #[test]
        fn prop_round_stays_within_bucket(ts in 0i64..4_102_444_800_000_000_000, idx in 0usize..6) {
            let iv = Interval::ALL[idx];
            let start = iv.round(ts);
            prop_assert!(start <= ts);
            prop_assert!(ts - start < iv.duration_nanos());
        }
    }
}
