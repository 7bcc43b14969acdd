use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported bar granularities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    H6,
    D1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 8] = [
        Timeframe::M1,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::H6,
        Timeframe::D1,
    ];

    /// Bar duration in minutes.
    pub fn minutes(&self) -> i64 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H4 => 240,
            Timeframe::H6 => 360,
            Timeframe::D1 => 1440,
        }
    }

    /// Bar duration as a chrono interval.
    pub fn interval(&self) -> Duration {
        Duration::minutes(self.minutes())
    }

    pub fn parse(s: &str) -> Option<Timeframe> {
        match s.to_lowercase().as_str() {
            "1m" => Some(Timeframe::M1),
            "5m" => Some(Timeframe::M5),
            "15m" => Some(Timeframe::M15),
            "30m" => Some(Timeframe::M30),
            "1h" => Some(Timeframe::H1),
            "4h" => Some(Timeframe::H4),
            "6h" => Some(Timeframe::H6),
            "1d" => Some(Timeframe::D1),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::H6 => "6h",
            Timeframe::D1 => "1d",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roundtrip() {
        for tf in Timeframe::ALL {
            assert_eq!(Timeframe::parse(tf.label()), Some(tf));
        }
        assert_eq!(Timeframe::parse("7m"), None);
    }

    #[test]
    fn test_minutes_ordering() {
        let mut prev = 0;
        for tf in Timeframe::ALL {
            assert!(tf.minutes() > prev);
            prev = tf.minutes();
        }
    }
}
