use crate::models::{Bar, OutcomeLabel, Pattern, PatternOutcome, Timeframe};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Number of bars in each pattern window.
    pub window_size: usize,
    /// Bars to advance between consecutive windows.
    pub step_size: usize,
    /// Bars after the window used to measure the outcome.
    pub outcome_bars: usize,
    /// Windows whose realized volatility falls below this are discarded.
    /// Percent units of close-to-close return std-dev; a heuristic filter,
    /// not a tuned constant.
    pub min_volatility: f64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            window_size: 20,
            step_size: 1,
            outcome_bars: 5,
            min_volatility: 0.05,
        }
    }
}

/// Pure transformation from a timestamp-sorted bar slice to patterns with
/// forward-looking outcome labels.
#[derive(Debug, Clone)]
pub struct PatternExtractor {
    config: ExtractorConfig,
}

impl PatternExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Slide a window across `bars` and yield one pattern per position.
    ///
    /// Requires at least `window_size + outcome_bars` bars; fewer produce an
    /// empty iterator (logged, not an error). The `outcome_bars` bars after
    /// each window feed only the outcome fields, never the window itself.
    /// Windows below the volatility floor are skipped.
    pub fn extract<'a>(
        &'a self,
        bars: &'a [Bar],
        symbol: &'a str,
        timeframe: Timeframe,
    ) -> PatternWindows<'a> {
        let required = self.config.window_size + self.config.outcome_bars;
        if bars.len() < required {
            info!(
                "Not enough bars for {}:{} extraction: have {}, need {}",
                symbol,
                timeframe,
                bars.len(),
                required
            );
        }
        PatternWindows {
            extractor: self,
            bars,
            symbol,
            timeframe,
            pos: 0,
        }
    }

    /// The most recent `window_size` bars as an outcome-less pattern, used
    /// for live queries. `None` when fewer bars are available.
    pub fn extract_latest(
        &self,
        bars: &[Bar],
        symbol: &str,
        timeframe: Timeframe,
    ) -> Option<Pattern> {
        if bars.len() < self.config.window_size {
            info!(
                "Not enough bars for latest {}:{} window: have {}, need {}",
                symbol,
                timeframe,
                bars.len(),
                self.config.window_size
            );
            return None;
        }
        let window = &bars[bars.len() - self.config.window_size..];
        Some(Pattern::from_window(symbol, timeframe, window, None))
    }

    fn outcome_for(&self, window: &[Bar], outcome_bars: &[Bar]) -> PatternOutcome {
        let entry = window[window.len() - 1].close;
        let exit = outcome_bars[outcome_bars.len() - 1].close;

        let (return_pct, max_drawdown_pct) = if entry.abs() < f64::EPSILON {
            (0.0, 0.0)
        } else {
            let ret = (exit - entry) / entry * 100.0;
            let dd = outcome_bars
                .iter()
                .map(|b| (entry - b.low) / entry * 100.0)
                .fold(0.0_f64, f64::max);
            (ret, dd)
        };

        PatternOutcome {
            bars: outcome_bars.len(),
            return_pct,
            max_drawdown_pct,
            label: OutcomeLabel::from_return(return_pct),
        }
    }
}

/// Finite, forward-only iterator over pattern windows.
pub struct PatternWindows<'a> {
    extractor: &'a PatternExtractor,
    bars: &'a [Bar],
    symbol: &'a str,
    timeframe: Timeframe,
    pos: usize,
}

impl<'a> Iterator for PatternWindows<'a> {
    type Item = Pattern;

    fn next(&mut self) -> Option<Pattern> {
        let cfg = self.extractor.config();
        loop {
            let window_end = self.pos + cfg.window_size;
            let outcome_end = window_end + cfg.outcome_bars;
            if outcome_end > self.bars.len() {
                return None;
            }

            let window = &self.bars[self.pos..window_end];
            let outcome_bars = &self.bars[window_end..outcome_end];
            self.pos += cfg.step_size;

            let outcome = self.extractor.outcome_for(window, outcome_bars);
            let pattern =
                Pattern::from_window(self.symbol, self.timeframe, window, Some(outcome));

            if pattern.volatility < cfg.min_volatility {
                debug!(
                    "Discarding low-volatility window at {} ({:.4} < {:.4})",
                    pattern.window_start, pattern.volatility, cfg.min_volatility
                );
                continue;
            }
            return Some(pattern);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn drifting_bars(n: usize) -> Vec<Bar> {
        // Upward drift with enough wobble to clear any volatility floor.
        (0..n)
            .map(|i| {
                let base = 100.0 + i as f64 + if i % 2 == 0 { 0.5 } else { -0.5 };
                Bar::new(
                    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                        + chrono::Duration::minutes(i as i64),
                    base,
                    base + 1.0,
                    base - 1.0,
                    base + 0.5,
                    10.0 + i as f64,
                )
            })
            .collect()
    }

    fn extractor(window: usize, step: usize, outcome: usize) -> PatternExtractor {
        PatternExtractor::new(ExtractorConfig {
            window_size: window,
            step_size: step,
            outcome_bars: outcome,
            min_volatility: 0.0,
        })
    }

    #[test]
    fn test_window_count_invariant() {
        let bars = drifting_bars(50);
        // floor((50 - 20 - 5) / 5) + 1 = 6
        let patterns: Vec<Pattern> = extractor(20, 5, 5)
            .extract(&bars, "BTCUSDT", Timeframe::M1)
            .collect();
        assert_eq!(patterns.len(), 6);
    }

    #[test]
    fn test_exact_threshold_yields_one_pattern() {
        let bars = drifting_bars(25);
        let patterns: Vec<Pattern> = extractor(20, 5, 5)
            .extract(&bars, "BTCUSDT", Timeframe::M1)
            .collect();
        assert_eq!(patterns.len(), 1);
    }

    #[test]
    fn test_below_threshold_yields_nothing() {
        let bars = drifting_bars(24);
        let patterns: Vec<Pattern> = extractor(20, 5, 5)
            .extract(&bars, "BTCUSDT", Timeframe::M1)
            .collect();
        assert!(patterns.is_empty());
    }

    #[test]
    fn test_outcome_bars_excluded_from_window() {
        let bars = drifting_bars(25);
        let patterns: Vec<Pattern> = extractor(20, 5, 5)
            .extract(&bars, "BTCUSDT", Timeframe::M1)
            .collect();
        let p = &patterns[0];
        assert_eq!(p.window_size(), 20);
        assert_eq!(p.window_end, bars[19].timestamp);

        let outcome = p.outcome.as_ref().unwrap();
        assert_eq!(outcome.bars, 5);
        // Drift is ~1/bar from close 119.5 to close 124.5 -> positive return.
        assert!(outcome.return_pct > 0.5);
        assert_eq!(outcome.label, OutcomeLabel::Win);
    }

    #[test]
    fn test_low_volatility_windows_discarded() {
        // Perfectly flat series: volatility 0 for every window.
        let bars: Vec<Bar> = (0..50)
            .map(|i| {
                Bar::new(
                    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                        + chrono::Duration::minutes(i as i64),
                    100.0,
                    100.0,
                    100.0,
                    100.0,
                    10.0,
                )
            })
            .collect();
        let ex = PatternExtractor::new(ExtractorConfig {
            window_size: 20,
            step_size: 5,
            outcome_bars: 5,
            min_volatility: 0.05,
        });
        let patterns: Vec<Pattern> = ex.extract(&bars, "BTCUSDT", Timeframe::M1).collect();
        assert!(patterns.is_empty());
    }

    #[test]
    fn test_extract_latest_has_no_outcome() {
        let bars = drifting_bars(30);
        let p = extractor(20, 5, 5)
            .extract_latest(&bars, "BTCUSDT", Timeframe::M1)
            .unwrap();
        assert!(p.outcome.is_none());
        assert_eq!(p.window_size(), 20);
        assert_eq!(p.window_end, bars[29].timestamp);

        let short = drifting_bars(10);
        assert!(extractor(20, 5, 5)
            .extract_latest(&short, "BTCUSDT", Timeframe::M1)
            .is_none());
    }
}
