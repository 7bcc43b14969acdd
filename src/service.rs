use crate::convert;
use crate::error::ArchiveResult;
use crate::index::{PatternIndex, SearchFilter};
use crate::matcher::partial;
use crate::matcher::{PartialPatternAnalysis, PartialPatternMatcher};
use crate::models::{Bar, Timeframe, TrendDirection};
use crate::patterns::PatternExtractor;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Categorical verdict derived from signal boost and confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recommendation {
    StrongFollow,
    Follow,
    Neutral,
    Avoid,
}

impl Recommendation {
    pub fn from_scores(signal_boost: f64, confidence: f64) -> Self {
        if signal_boost >= 0.4 && confidence >= 0.6 {
            Recommendation::StrongFollow
        } else if signal_boost >= 0.15 {
            Recommendation::Follow
        } else if signal_boost <= -0.15 {
            Recommendation::Avoid
        } else {
            Recommendation::Neutral
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Recommendation::StrongFollow => "strong-follow",
            Recommendation::Follow => "follow",
            Recommendation::Neutral => "neutral",
            Recommendation::Avoid => "avoid",
        };
        write!(f, "{}", s)
    }
}

/// Aggregated verdict for a complete window.
#[derive(Debug, Clone)]
pub struct PatternAnalysis {
    pub match_count: usize,
    pub win_rate: f64,
    pub mean_return: f64,
    pub mean_score: f64,
    pub trend_consistency: f64,
    pub confidence: f64,
    pub signal_boost: f64,
    pub recommendation: Recommendation,
    pub expected_direction: TrendDirection,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub search_limit: usize,
    /// Below this many trend-filtered matches the search widens.
    pub min_matches: usize,
    pub fallback_score_threshold: f64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            search_limit: 20,
            min_matches: 5,
            fallback_score_threshold: 0.6,
        }
    }
}

/// Query surface for the decision engine. Thin glue over the extractor,
/// index, and partial matcher; holds no mutable state of its own.
pub struct PatternService {
    extractor: PatternExtractor,
    index: Arc<PatternIndex>,
    partial: PartialPatternMatcher,
    config: ServiceConfig,
}

impl PatternService {
    pub fn new(
        extractor: PatternExtractor,
        index: Arc<PatternIndex>,
        partial: PartialPatternMatcher,
        config: ServiceConfig,
    ) -> Self {
        Self {
            extractor,
            index,
            partial,
            config,
        }
    }

    /// Analyze a complete recent window against indexed history. `None`
    /// when the window cannot be formed or nothing similar is indexed.
    ///
    /// When `target_timeframe` is given the bars are aggregated to it
    /// first; an illegal conversion is an error, not a silent skip.
    #[instrument(skip(self, bars), fields(symbol = %symbol, timeframe = %timeframe))]
    pub async fn analyze_signal(
        &self,
        bars: &[Bar],
        symbol: &str,
        timeframe: Timeframe,
        expected_direction: TrendDirection,
        cross_symbol: bool,
        target_timeframe: Option<Timeframe>,
    ) -> ArchiveResult<Option<PatternAnalysis>> {
        let (bars, timeframe) = resample(bars, timeframe, target_timeframe)?;

        let query = match self.extractor.extract_latest(&bars, symbol, timeframe) {
            Some(p) => p,
            None => return Ok(None),
        };

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
                "Only {} trend-filtered matches for {}:{}; widening search",
                matches.len(),
                symbol,
                timeframe
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
            info!("No indexed history similar to {}:{} window", symbol, timeframe);
            return Ok(None);
        }

        let stats = PatternIndex::statistics(&matches);
        let trend_consistency = partial::consistency(&matches, expected_direction);
        let confidence = partial::base_confidence(stats.count, stats.mean_score);
        let signal_boost =
            partial::signal_boost(stats.win_rate, trend_consistency, stats.mean_return);

        Ok(Some(PatternAnalysis {
            match_count: stats.count,
            win_rate: stats.win_rate,
            mean_return: stats.mean_return,
            mean_score: stats.mean_score,
            trend_consistency,
            confidence,
            signal_boost,
            recommendation: Recommendation::from_scores(signal_boost, confidence),
            expected_direction,
        }))
    }

    /// Analyze an in-progress window; see `PartialPatternMatcher`.
    #[instrument(skip(self, bars), fields(symbol = %symbol, timeframe = %timeframe))]
    pub async fn analyze_partial_signal(
        &self,
        bars: &[Bar],
        symbol: &str,
        timeframe: Timeframe,
        expected_direction: TrendDirection,
        cross_symbol: bool,
        target_timeframe: Option<Timeframe>,
    ) -> ArchiveResult<Option<PartialPatternAnalysis>> {
        let (bars, timeframe) = resample(bars, timeframe, target_timeframe)?;
        self.partial
            .analyze_partial(&bars, symbol, timeframe, expected_direction, cross_symbol)
            .await
    }
}

/// Aggregate to `target` when one is requested and differs from the
/// native timeframe.
fn resample(
    bars: &[Bar],
    timeframe: Timeframe,
    target: Option<Timeframe>,
) -> ArchiveResult<(Vec<Bar>, Timeframe)> {
    match target {
        Some(t) if t != timeframe => Ok((convert::aggregate(bars, timeframe, t)?, t)),
        _ => Ok((bars.to_vec(), timeframe)),
    }
}
