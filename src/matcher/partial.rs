use crate::error::ArchiveResult;
use crate::index::{PatternIndex, PatternMatch, SearchFilter};
use crate::models::{close_return_stddev, Bar, Timeframe, TrendDirection};
use crate::patterns::PatternExtractor;
use std::sync::Arc;
use tracing::{debug, info};

/// How the missing tail of an incomplete window is projected before
/// embedding. A closed set; every case is handled exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionStrategy {
    /// Repeat the last close as a flat, zero-volume continuation. Cheap,
    /// information-losing.
    ZeroPad,
    /// Repeat the last bar's OHLC and volume verbatim.
    LastValue,
    /// Linear regression on recent closes extrapolated forward, high/low
    /// from recent realized volatility, constant volume.
    TrendProjection,
}

#[derive(Debug, Clone)]
pub struct PartialMatcherConfig {
    pub window_size: usize,
    /// Minimum real bars before any analysis is attempted.
    pub min_bars_required: usize,
    /// Confidence decay exponent; < 1 means sub-linear degradation with
    /// incompleteness.
    pub alpha: f64,
    pub strategy: ProjectionStrategy,
    /// Top-k limit for the similarity search.
    pub search_limit: usize,
    /// Below this many trend-filtered matches the search falls back to an
    /// unfiltered, lower-threshold pass.
    pub min_matches: usize,
    /// Score threshold used by the fallback pass.
    pub fallback_score_threshold: f64,
}

impl PartialMatcherConfig {
    pub fn for_window(window_size: usize) -> Self {
        Self {
            window_size,
            min_bars_required: window_size / 2,
            alpha: 0.7,
            strategy: ProjectionStrategy::TrendProjection,
            search_limit: 20,
            min_matches: 5,
            fallback_score_threshold: 0.6,
        }
    }
}

/// Aggregated verdict for an in-progress window.
#[derive(Debug, Clone)]
pub struct PartialPatternAnalysis {
    /// Fraction of the window made of real (non-projected) bars.
    pub completion_ratio: f64,
    pub projected_bars: usize,
    pub match_count: usize,
    pub win_rate: f64,
    pub mean_return: f64,
    pub mean_score: f64,
    /// Fraction of matches whose trend agrees with the expected direction.
    pub trend_consistency: f64,
    pub base_confidence: f64,
    /// `base_confidence * completion_ratio^alpha`.
    pub adjusted_confidence: f64,
    /// Signed boost in [-1, 1] for the candidate signal.
    pub signal_boost: f64,
    /// Confident enough to act before the pattern fully forms.
    pub early_entry_opportunity: bool,
    pub expected_direction: TrendDirection,
}

/// Evaluates incomplete windows by projecting the missing tail, searching
/// the index like the full matcher, and discounting confidence by
/// incompleteness.
pub struct PartialPatternMatcher {
    extractor: PatternExtractor,
    index: Arc<PatternIndex>,
    config: PartialMatcherConfig,
}

impl PartialPatternMatcher {
    pub fn new(
        extractor: PatternExtractor,
        index: Arc<PatternIndex>,
        config: PartialMatcherConfig,
    ) -> Self {
        Self {
            extractor,
            index,
            config,
        }
    }

    pub fn config(&self) -> &PartialMatcherConfig {
        &self.config
    }

    /// Analyze an in-progress window. `None` when there are too few bars or
    /// the index holds no comparable history.
    pub async fn analyze_partial(
        &self,
        bars: &[Bar],
        symbol: &str,
        timeframe: Timeframe,
        expected_direction: TrendDirection,
        cross_symbol: bool,
    ) -> ArchiveResult<Option<PartialPatternAnalysis>> {
        let real_bars = bars.len();
        if real_bars < self.config.min_bars_required {
            info!(
                "Partial analysis for {}:{} skipped: {} bars < {} required",
                symbol, timeframe, real_bars, self.config.min_bars_required
            );
            return Ok(None);
        }

        let completion_ratio =
            (real_bars as f64 / self.config.window_size as f64).min(1.0);
        let projected = project_window(bars, self.config.window_size, timeframe, self.config.strategy);
        let projected_bars = self.config.window_size.saturating_sub(real_bars);

        let query = match self.extractor.extract_latest(&projected, symbol, timeframe) {
            Some(p) => p,
            None => return Ok(None),
        };

        // Trend-filtered first; widen when the neighborhood is too thin.
        let symbol_filter = (!cross_symbol).then(|| symbol.to_string());
        let filter = SearchFilter {
            symbol: symbol_filter.clone(),
            timeframe: Some(timeframe.label().to_string()),
            trend: Some(expected_direction.to_string()),
            ..Default::default()
        };
        let mut matches = self
            .index
            .search(&query, self.config.search_limit, &filter, None)
            .await?;
        if matches.len() < self.config.min_matches {
            debug!(
                "Only {} trend-filtered matches; falling back to unfiltered search",
                matches.len()
            );
            let fallback = SearchFilter {
                symbol: symbol_filter,
                timeframe: Some(timeframe.label().to_string()),
                ..Default::default()
            };
            matches = self
                .index
                .search(
                    &query,
                    self.config.search_limit,
                    &fallback,
                    Some(self.config.fallback_score_threshold),
                )
                .await?;
        }
        if matches.is_empty() {
            info!(
                "No comparable history for partial {}:{} window",
                symbol, timeframe
            );
            return Ok(None);
        }

        let stats = PatternIndex::statistics(&matches);
        let trend_consistency = consistency(&matches, expected_direction);
        let base_confidence = base_confidence(stats.count, stats.mean_score);
        let adjusted_confidence =
            adjusted_confidence(base_confidence, completion_ratio, self.config.alpha);
        let signal_boost = signal_boost(stats.win_rate, trend_consistency, stats.mean_return);

        let early_entry_opportunity = completion_ratio < 0.9
            && adjusted_confidence > 0.5
            && signal_boost > 0.4
            && stats.count >= 10;

        Ok(Some(PartialPatternAnalysis {
            completion_ratio,
            projected_bars,
            match_count: stats.count,
            win_rate: stats.win_rate,
            mean_return: stats.mean_return,
            mean_score: stats.mean_score,
            trend_consistency,
            base_confidence,
            adjusted_confidence,
            signal_boost,
            early_entry_opportunity,
            expected_direction,
        }))
    }
}

/// Fraction of matches whose stored trend agrees with the expected
/// direction.
pub fn consistency(matches: &[PatternMatch], expected: TrendDirection) -> f64 {
    if matches.is_empty() {
        return 0.5;
    }
    matches.iter().filter(|m| m.trend == expected).count() as f64 / matches.len() as f64
}

/// `min(count/20, 1) * mean similarity`.
pub fn base_confidence(match_count: usize, mean_score: f64) -> f64 {
    (match_count as f64 / 20.0).min(1.0) * mean_score
}

/// Confidence discounted sub-linearly by incompleteness: at completion 1.0
/// this equals the base confidence exactly.
pub fn adjusted_confidence(base: f64, completion_ratio: f64, alpha: f64) -> f64 {
    base * completion_ratio.clamp(0.0, 1.0).powf(alpha)
}

/// Weighted combination of win rate, trend consistency, and mean return,
/// each term clamped independently; result in [-1, 1].
pub fn signal_boost(win_rate: f64, trend_consistency: f64, mean_return: f64) -> f64 {
    let win_term = 0.6 * ((win_rate - 0.5) * 2.0).clamp(-1.0, 1.0);
    let trend_term = 0.25 * ((trend_consistency - 0.5) * 2.0).clamp(-1.0, 1.0) * 0.5;
    let return_term = 0.15 * (mean_return / 2.0).clamp(-0.25, 0.25);
    (win_term + trend_term + return_term).clamp(-1.0, 1.0)
}

/// Append projected bars until the window holds exactly `window_size` bars.
/// Inputs longer than the window are passed through untouched (the
/// extractor takes the most recent bars).
fn project_window(
    bars: &[Bar],
    window_size: usize,
    timeframe: Timeframe,
    strategy: ProjectionStrategy,
) -> Vec<Bar> {
    let mut out = bars.to_vec();
    if out.len() >= window_size || out.is_empty() {
        return out;
    }
    let missing = window_size - out.len();
    let last = out[out.len() - 1].clone();
    let interval = timeframe.interval();

    match strategy {
        ProjectionStrategy::ZeroPad => {
            for j in 1..=missing {
                out.push(Bar::new(
                    last.timestamp + interval * j as i32,
                    last.close,
                    last.close,
                    last.close,
                    last.close,
                    0.0,
                ));
            }
        }
        ProjectionStrategy::LastValue => {
            for j in 1..=missing {
                out.push(Bar::new(
                    last.timestamp + interval * j as i32,
                    last.open,
                    last.high,
                    last.low,
                    last.close,
                    last.volume,
                ));
            }
        }
        ProjectionStrategy::TrendProjection => {
            let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
            let recent = &closes[closes.len().saturating_sub(10)..];
            let slope = linear_slope(recent);
            // Realized volatility of recent closes, as a fraction.
            let vol = close_return_stddev(recent) / 100.0;

            let mut prev_close = last.close;
            for j in 1..=missing {
                let close = last.close + slope * j as f64;
                let high = (close * (1.0 + vol)).max(prev_close.max(close));
                let low = (close * (1.0 - vol)).min(prev_close.min(close));
                out.push(Bar::new(
                    last.timestamp + interval * j as i32,
                    prev_close,
                    high,
                    low,
                    close,
                    last.volume,
                ));
                prev_close = close;
            }
        }
    }
    out
}

/// Per-step slope of an ordinary least-squares line; 0 for degenerate
/// inputs.
fn linear_slope(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let mean_x = (n as f64 - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n as f64;
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        sxy += dx * (y - mean_y);
        sxx += dx * dx;
    }
    if sxx < f64::EPSILON {
        0.0
    } else {
        sxy / sxx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexConfig, MemoryBackend};
    use crate::patterns::{EmbedderConfig, ExtractorConfig, PatternEmbedder};
    use chrono::{Duration, TimeZone, Utc};

    fn drifting_bars(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let base = 100.0 + i as f64 + if i % 2 == 0 { 0.4 } else { -0.4 };
                Bar::new(
                    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
                        + Duration::minutes(i as i64),
                    base,
                    base + 1.0,
                    base - 1.0,
                    base + 0.6,
                    10.0,
                )
            })
            .collect()
    }

    #[test]
    fn test_adjusted_confidence_monotonic_in_completion() {
        let base = 0.8;
        let half = adjusted_confidence(base, 0.5, 0.7);
        let full = adjusted_confidence(base, 1.0, 0.7);
        assert!(half < full);
        assert!((full - base).abs() < 1e-12);
        // Sub-linear decay: a half-complete pattern keeps ~62%, not 50%.
        assert!((half / base - 0.5f64.powf(0.7)).abs() < 1e-12);
        assert!(half / base > 0.6);
    }

    #[test]
    fn test_signal_boost_terms_clamped() {
        // Extreme inputs saturate each term instead of blowing up.
        let max = signal_boost(1.0, 1.0, 100.0);
        assert!((max - (0.6 + 0.125 + 0.0375)).abs() < 1e-12);
        let min = signal_boost(0.0, 0.0, -100.0);
        assert!((min - (-0.6 - 0.125 - 0.0375)).abs() < 1e-12);
        // Neutral inputs produce no boost.
        assert!(signal_boost(0.5, 0.5, 0.0).abs() < 1e-12);
    }

    #[test]
    fn test_projection_fills_to_window_size() {
        let bars = drifting_bars(10);
        for strategy in [
            ProjectionStrategy::ZeroPad,
            ProjectionStrategy::LastValue,
            ProjectionStrategy::TrendProjection,
        ] {
            let out = project_window(&bars, 20, Timeframe::M1, strategy);
            assert_eq!(out.len(), 20, "{:?}", strategy);
            // Projected timestamps continue one interval apart.
            assert_eq!(
                out[10].timestamp,
                bars[9].timestamp + Duration::minutes(1)
            );
        }
    }

    #[test]
    fn test_zero_pad_projects_flat_zero_volume() {
        let bars = drifting_bars(10);
        let out = project_window(&bars, 20, Timeframe::M1, ProjectionStrategy::ZeroPad);
        let last_close = bars[9].close;
        for b in &out[10..] {
            assert!((b.open - last_close).abs() < 1e-10);
            assert!((b.close - last_close).abs() < 1e-10);
            assert_eq!(b.volume, 0.0);
        }
    }

    #[test]
    fn test_trend_projection_extends_drift() {
        let bars = drifting_bars(10);
        let out = project_window(&bars, 20, Timeframe::M1, ProjectionStrategy::TrendProjection);
        // Upward drift should continue: the final projected close exceeds
        // the last real close, and highs/lows stay consistent.
        assert!(out[19].close > bars[9].close);
        for b in &out[10..] {
            assert!(b.high >= b.open.max(b.close) - 1e-9);
            assert!(b.low <= b.open.min(b.close) + 1e-9);
        }
    }

    #[test]
    fn test_linear_slope() {
        let values: Vec<f64> = (0..10).map(|i| 5.0 + 2.0 * i as f64).collect();
        assert!((linear_slope(&values) - 2.0).abs() < 1e-9);
        assert!(linear_slope(&[3.0]).abs() < 1e-12);
    }

    async fn seeded_matcher(window: usize) -> PartialPatternMatcher {
        let index = Arc::new(PatternIndex::new(
            Arc::new(MemoryBackend::new()),
            PatternEmbedder::new(EmbedderConfig { window_size: window }),
            IndexConfig {
                score_threshold: 0.5,
                ..Default::default()
            },
        ));
        index.ensure_collection().await.unwrap();

        let extractor = PatternExtractor::new(ExtractorConfig {
            window_size: window,
            step_size: 1,
            outcome_bars: 3,
            min_volatility: 0.0,
        });
        let history = drifting_bars(120);
        let patterns: Vec<_> = extractor.extract(&history, "BTCUSDT", Timeframe::M1).collect();
        index.insert_batch(&patterns, None).await;

        PartialPatternMatcher::new(
            extractor,
            index,
            PartialMatcherConfig::for_window(window),
        )
    }

    #[tokio::test]
    async fn test_analyze_partial_requires_min_bars() {
        let matcher = seeded_matcher(20).await;
        let few = drifting_bars(5);
        let out = matcher
            .analyze_partial(&few, "BTCUSDT", Timeframe::M1, TrendDirection::Up, false)
            .await
            .unwrap();
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn test_analyze_partial_finds_similar_history() {
        let matcher = seeded_matcher(20).await;
        // 14 of 20 bars of the same drifting shape.
        let partial = drifting_bars(14);
        let analysis = matcher
            .analyze_partial(&partial, "BTCUSDT", Timeframe::M1, TrendDirection::Up, false)
            .await
            .unwrap()
            .expect("analysis");

        assert!((analysis.completion_ratio - 0.7).abs() < 1e-10);
        assert_eq!(analysis.projected_bars, 6);
        assert!(analysis.match_count > 0);
        assert!(analysis.adjusted_confidence < analysis.base_confidence);
        // Steady uptrend history: matches should mostly be wins.
        assert!(analysis.win_rate > 0.5);
    }

    #[tokio::test]
    async fn test_analyze_partial_complete_window_keeps_base_confidence() {
        let matcher = seeded_matcher(20).await;
        let full = drifting_bars(20);
        let analysis = matcher
            .analyze_partial(&full, "BTCUSDT", Timeframe::M1, TrendDirection::Up, false)
            .await
            .unwrap()
            .expect("analysis");
        assert!((analysis.completion_ratio - 1.0).abs() < 1e-12);
        assert!((analysis.adjusted_confidence - analysis.base_confidence).abs() < 1e-12);
    }
}
