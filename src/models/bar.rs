use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single OHLCV bar. Ordered by timestamp within a (symbol, timeframe)
/// series; duplicate timestamps are not permitted in one series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// High-low range of the bar.
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    /// Absolute body size (open-to-close distance).
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }
}
