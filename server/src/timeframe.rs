use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Chart timeframe. 1m is the base resolution; every other member is an
/// aggregate of it. The set is fixed at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    Min1,
    #[serde(rename = "2m")]
    Min2,
    #[serde(rename = "3m")]
    Min3,
    #[serde(rename = "5m")]
    Min5,
    #[serde(rename = "15m")]
    Min15,
    #[serde(rename = "30m")]
    Min30,
    #[serde(rename = "1h")]
    Hour1,
    #[serde(rename = "4h")]
    Hour4,
}

impl Timeframe {
    /// Length of one candle in minutes.
    pub fn minutes(&self) -> i64 {
        match self {
            Timeframe::Min1 => 1,
            Timeframe::Min2 => 2,
            Timeframe::Min3 => 3,
            Timeframe::Min5 => 5,
            Timeframe::Min15 => 15,
            Timeframe::Min30 => 30,
            Timeframe::Hour1 => 60,
            Timeframe::Hour4 => 240,
        }
    }

    /// Length of one candle in seconds.
    pub fn step_secs(&self) -> i64 {
        self.minutes() * 60
    }

    /// Short symbolic label, identical to the wire representation.
    pub fn label(&self) -> &'static str {
        match self {
            Timeframe::Min1 => "1m",
            Timeframe::Min2 => "2m",
            Timeframe::Min3 => "3m",
            Timeframe::Min5 => "5m",
            Timeframe::Min15 => "15m",
            Timeframe::Min30 => "30m",
            Timeframe::Hour1 => "1h",
            Timeframe::Hour4 => "4h",
        }
    }

    /// All timeframes, ordered by minute length.
    pub fn all() -> &'static [Timeframe] {
        &[
            Timeframe::Min1,
            Timeframe::Min2,
            Timeframe::Min3,
            Timeframe::Min5,
            Timeframe::Min15,
            Timeframe::Min30,
            Timeframe::Hour1,
            Timeframe::Hour4,
        ]
    }

    /// Snap an epoch timestamp down to this timeframe's open boundary:
    /// `align(t) = t - (t mod step_secs)`.
    pub fn align(&self, t: i64) -> i64 {
        t - t.rem_euclid(self.step_secs())
    }

    /// Parse a symbolic label ("1m" .. "4h").
    pub fn parse(s: &str) -> Option<Timeframe> {
        match s.trim().to_lowercase().as_str() {
            "1m" => Some(Timeframe::Min1),
            "2m" => Some(Timeframe::Min2),
            "3m" => Some(Timeframe::Min3),
            "5m" => Some(Timeframe::Min5),
            "15m" => Some(Timeframe::Min15),
            "30m" => Some(Timeframe::Min30),
            "1h" => Some(Timeframe::Hour1),
            "4h" => Some(Timeframe::Hour4),
            _ => None,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timeframe::parse(s).ok_or_else(|| format!("unknown timeframe: {s}"))
    }
}
