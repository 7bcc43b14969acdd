use crate::models::{Bar, Timeframe};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Overall price direction of a pattern window, by a +/-1% threshold on the
/// aggregate change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendDirection {
    Up,
    Down,
    Sideways,
}

impl fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrendDirection::Up => write!(f, "up"),
            TrendDirection::Down => write!(f, "down"),
            TrendDirection::Sideways => write!(f, "sideways"),
        }
    }
}

impl TrendDirection {
    pub fn parse(s: &str) -> Option<TrendDirection> {
        match s {
            "up" => Some(TrendDirection::Up),
            "down" => Some(TrendDirection::Down),
            "sideways" => Some(TrendDirection::Sideways),
            _ => None,
        }
    }

    /// Numeric encoding used by the embedder: +1 / -1 / 0.
    pub fn encoding(&self) -> f64 {
        match self {
            TrendDirection::Up => 1.0,
            TrendDirection::Down => -1.0,
            TrendDirection::Sideways => 0.0,
        }
    }
}

/// Volume tendency across the window, first half vs second half mean with a
/// 20% threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeTrend {
    Increasing,
    Decreasing,
    Stable,
}

impl fmt::Display for VolumeTrend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolumeTrend::Increasing => write!(f, "increasing"),
            VolumeTrend::Decreasing => write!(f, "decreasing"),
            VolumeTrend::Stable => write!(f, "stable"),
        }
    }
}

/// Outcome classification: win above +0.5%, loss below -0.5%, else neutral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeLabel {
    Win,
    Loss,
    Neutral,
}

impl fmt::Display for OutcomeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeLabel::Win => write!(f, "win"),
            OutcomeLabel::Loss => write!(f, "loss"),
            OutcomeLabel::Neutral => write!(f, "neutral"),
        }
    }
}

impl OutcomeLabel {
    pub fn parse(s: &str) -> Option<OutcomeLabel> {
        match s {
            "win" => Some(OutcomeLabel::Win),
            "loss" => Some(OutcomeLabel::Loss),
            "neutral" => Some(OutcomeLabel::Neutral),
            _ => None,
        }
    }

    pub fn from_return(return_pct: f64) -> OutcomeLabel {
        if return_pct > 0.5 {
            OutcomeLabel::Win
        } else if return_pct < -0.5 {
            OutcomeLabel::Loss
        } else {
            OutcomeLabel::Neutral
        }
    }
}

/// Forward-looking outcome of a historical pattern. A live/query pattern
/// carries no outcome; indexed historical patterns always do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternOutcome {
    /// How many bars after the window were used to measure the outcome.
    pub bars: usize,
    /// Percent return from the window-end close to the outcome-end close.
    pub return_pct: f64,
    /// Maximum drawdown (%) observed during the outcome period, >= 0.
    pub max_drawdown_pct: f64,
    pub label: OutcomeLabel,
}

/// A fixed-length window of consecutive bars plus derived descriptors.
/// Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,

    /// Raw OHLCV arrays, one entry per bar.
    pub opens: Vec<f64>,
    pub highs: Vec<f64>,
    pub lows: Vec<f64>,
    pub closes: Vec<f64>,
    pub volumes: Vec<f64>,

    /// W x 4 matrix: each OHLC value as percent deviation from the window's
    /// first open price. Row order matches the bar order.
    pub normalized: Vec<[f64; 4]>,

    /// Percent price change across the window (first open to last close).
    pub price_change_pct: f64,
    /// Standard deviation of close-to-close percent returns.
    pub volatility: f64,
    pub trend: TrendDirection,
    pub volume_trend: VolumeTrend,

    pub outcome: Option<PatternOutcome>,
}

impl Pattern {
    /// Build a pattern from a window of bars. `bars` must be non-empty and
    /// timestamp-sorted; descriptors are computed once here and never
    /// mutated afterwards.
    pub fn from_window(
        symbol: &str,
        timeframe: Timeframe,
        bars: &[Bar],
        outcome: Option<PatternOutcome>,
    ) -> Self {
        let first_open = bars[0].open;
        let last_close = bars[bars.len() - 1].close;

        let normalized = bars
            .iter()
            .map(|b| {
                if first_open.abs() < f64::EPSILON {
                    [0.0; 4]
                } else {
                    [
                        (b.open - first_open) / first_open * 100.0,
                        (b.high - first_open) / first_open * 100.0,
                        (b.low - first_open) / first_open * 100.0,
                        (b.close - first_open) / first_open * 100.0,
                    ]
                }
            })
            .collect();

        let price_change_pct = if first_open.abs() < f64::EPSILON {
            0.0
        } else {
            (last_close - first_open) / first_open * 100.0
        };

        let trend = if price_change_pct > 1.0 {
            TrendDirection::Up
        } else if price_change_pct < -1.0 {
            TrendDirection::Down
        } else {
            TrendDirection::Sideways
        };

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let volatility = close_return_stddev(&closes);

        let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();
        let volume_trend = classify_volume_trend(&volumes);

        Self {
            symbol: symbol.to_string(),
            timeframe,
            window_start: bars[0].timestamp,
            window_end: bars[bars.len() - 1].timestamp,
            opens: bars.iter().map(|b| b.open).collect(),
            highs: bars.iter().map(|b| b.high).collect(),
            lows: bars.iter().map(|b| b.low).collect(),
            closes,
            volumes,
            normalized,
            price_change_pct,
            volatility,
            trend,
            volume_trend,
            outcome,
        }
    }

    pub fn window_size(&self) -> usize {
        self.closes.len()
    }
}

/// Standard deviation of close-to-close percent returns. Series shorter than
/// two closes, or with zero previous closes, degrade to 0.
pub fn close_return_stddev(closes: &[f64]) -> f64 {
    if closes.len() < 2 {
        return 0.0;
    }
    let returns: Vec<f64> = closes
        .windows(2)
        .filter(|w| w[0].abs() > f64::EPSILON)
        .map(|w| (w[1] - w[0]) / w[0] * 100.0)
        .collect();
    if returns.is_empty() {
        return 0.0;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let var = returns.iter().map(|r| (r - mean) * (r - mean)).sum::<f64>() / returns.len() as f64;
    var.sqrt()
}

fn classify_volume_trend(volumes: &[f64]) -> VolumeTrend {
    let half = volumes.len() / 2;
    if half == 0 {
        return VolumeTrend::Stable;
    }
    let first: f64 = volumes[..half].iter().sum::<f64>() / half as f64;
    let second: f64 = volumes[half..].iter().sum::<f64>() / (volumes.len() - half) as f64;
    if first.abs() < f64::EPSILON {
        return VolumeTrend::Stable;
    }
    if second > first * 1.2 {
        VolumeTrend::Increasing
    } else if second < first * 0.8 {
        VolumeTrend::Decreasing
    } else {
        VolumeTrend::Stable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn bar(i: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Bar {
        Bar::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::minutes(i),
            open,
            high,
            low,
            close,
            volume,
        )
    }

    #[test]
    fn test_normalized_matrix_is_percent_deviation_from_first_open() {
        let bars = vec![
            bar(0, 100.0, 102.0, 99.0, 101.0, 10.0),
            bar(1, 101.0, 103.0, 100.0, 102.0, 12.0),
        ];
        let p = Pattern::from_window("BTCUSDT", Timeframe::M1, &bars, None);

        assert!((p.normalized[0][0] - 0.0).abs() < 1e-10);
        assert!((p.normalized[0][1] - 2.0).abs() < 1e-10);
        assert!((p.normalized[0][2] - -1.0).abs() < 1e-10);
        assert!((p.normalized[1][3] - 2.0).abs() < 1e-10);
    }

    #[test]
    fn test_trend_threshold() {
        // +2% change -> up
        let up = Pattern::from_window(
            "X",
            Timeframe::M1,
            &[bar(0, 100.0, 103.0, 99.0, 102.0, 1.0)],
            None,
        );
        assert_eq!(up.trend, TrendDirection::Up);

        // +0.5% change -> sideways
        let flat = Pattern::from_window(
            "X",
            Timeframe::M1,
            &[bar(0, 100.0, 101.0, 99.0, 100.5, 1.0)],
            None,
        );
        assert_eq!(flat.trend, TrendDirection::Sideways);

        // -2% change -> down
        let down = Pattern::from_window(
            "X",
            Timeframe::M1,
            &[bar(0, 100.0, 100.0, 97.0, 98.0, 1.0)],
            None,
        );
        assert_eq!(down.trend, TrendDirection::Down);
    }

    #[test]
    fn test_volume_trend_classification() {
        let rising: Vec<Bar> = (0..10)
            .map(|i| bar(i, 100.0, 101.0, 99.0, 100.0, if i < 5 { 10.0 } else { 20.0 }))
            .collect();
        let p = Pattern::from_window("X", Timeframe::M1, &rising, None);
        assert_eq!(p.volume_trend, VolumeTrend::Increasing);

        let flat: Vec<Bar> = (0..10)
            .map(|i| bar(i, 100.0, 101.0, 99.0, 100.0, 10.0))
            .collect();
        let p = Pattern::from_window("X", Timeframe::M1, &flat, None);
        assert_eq!(p.volume_trend, VolumeTrend::Stable);
    }

    #[test]
    fn test_outcome_label_thresholds() {
        assert_eq!(OutcomeLabel::from_return(0.6), OutcomeLabel::Win);
        assert_eq!(OutcomeLabel::from_return(0.5), OutcomeLabel::Neutral);
        assert_eq!(OutcomeLabel::from_return(-0.5), OutcomeLabel::Neutral);
        assert_eq!(OutcomeLabel::from_return(-0.51), OutcomeLabel::Loss);
    }

    #[test]
    fn test_flat_series_has_zero_volatility() {
        let bars: Vec<Bar> = (0..5).map(|i| bar(i, 100.0, 100.0, 100.0, 100.0, 1.0)).collect();
        let p = Pattern::from_window("X", Timeframe::M1, &bars, None);
        assert!(p.volatility.abs() < 1e-12);
    }
}
