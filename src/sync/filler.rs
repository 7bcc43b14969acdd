use crate::error::{ArchiveError, ArchiveResult};
use crate::index::{PatternIndex, ProgressFn};
use crate::models::{Bar, Timeframe};
use crate::patterns::PatternExtractor;
use crate::sync::gaps::{DataGap, GapDetector, GapKind};
use crate::util::with_timeout;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// External bar-fetch collaborator. Implementations apply their own
/// exchange rate limits; an empty result means "no data available", not an
/// error.
#[async_trait]
pub trait BarSource: Send + Sync {
    async fn fetch(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        on_progress: Option<&ProgressFn>,
    ) -> ArchiveResult<Vec<Bar>>;

    /// Requests the source allows per minute, for fill-time estimation.
    fn rate_limit_per_minute(&self) -> u32 {
        1200
    }

    /// Maximum bars returned per request.
    fn bars_per_request(&self) -> usize {
        1000
    }
}

#[derive(Debug, Clone)]
pub struct FillerConfig {
    /// Pause between consecutive gap fills, respecting the shared source's
    /// rate limit.
    pub inter_gap_delay_ms: u64,
    /// Timeout on each bar-fetch call.
    pub fetch_timeout_ms: u64,
    /// Fixed extract+insert cost per fetched batch, for estimation only.
    pub per_batch_cost_secs: f64,
}

impl Default for FillerConfig {
    fn default() -> Self {
        Self {
            inter_gap_delay_ms: 500,
            fetch_timeout_ms: 30_000,
            per_batch_cost_secs: 0.5,
        }
    }
}

/// Result of a multi-gap backfill run: the running insert count plus every
/// per-gap failure, so one bad gap never aborts the rest.
#[derive(Debug, Default)]
pub struct BackfillReport {
    pub gaps_attempted: usize,
    pub patterns_inserted: usize,
    pub failures: Vec<(DataGap, String)>,
}

/// Orchestrates backfill: detect gaps, fetch bars, extract patterns, write
/// them through the index. Writes are append-only, so a cancelled fill
/// leaves gaps to be retried rather than corrupted state. Gap fills for one
/// (symbol, timeframe) run sequentially; duplicate inserts from overlapping
/// runs are tolerated redundancy, not prevented.
pub struct GapFiller {
    source: Arc<dyn BarSource>,
    extractor: PatternExtractor,
    index: Arc<PatternIndex>,
    detector: GapDetector,
    config: FillerConfig,
}

impl GapFiller {
    pub fn new(
        source: Arc<dyn BarSource>,
        extractor: PatternExtractor,
        index: Arc<PatternIndex>,
        config: FillerConfig,
    ) -> Self {
        let detector = GapDetector::new(Arc::clone(&index));
        Self {
            source,
            extractor,
            index,
            detector,
            config,
        }
    }

    /// Fetch bars for exactly `[gap.start, gap.end]`, extract patterns, and
    /// insert them. Empty fetches and empty extractions complete with 0.
    #[instrument(skip(self, on_progress), fields(symbol = %gap.symbol, kind = %gap.kind))]
    pub async fn fill_gap(
        &self,
        gap: &DataGap,
        on_progress: Option<&ProgressFn>,
    ) -> ArchiveResult<usize> {
        let (inserted, failure) = self.fill_gap_inner(gap, on_progress).await;
        match failure {
            Some(e) => {
                error!(
                    "Gap fill {}:{} [{} - {}] failed after {} patterns: {}",
                    gap.symbol, gap.timeframe, gap.start, gap.end, inserted, e
                );
                Err(e)
            }
            None => Ok(inserted),
        }
    }

    async fn fill_gap_inner(
        &self,
        gap: &DataGap,
        on_progress: Option<&ProgressFn>,
    ) -> (usize, Option<ArchiveError>) {
        let fetched = with_timeout(
            self.config.fetch_timeout_ms,
            self.source
                .fetch(&gap.symbol, gap.timeframe, gap.start, gap.end, on_progress),
        )
        .await;

        let mut bars = match fetched {
            Ok(bars) => bars,
            Err(e) => return (0, Some(e)),
        };
        if bars.is_empty() {
            info!(
                "No bars available for {}:{} gap [{} - {}]",
                gap.symbol, gap.timeframe, gap.start, gap.end
            );
            return (0, None);
        }
        bars.sort_by_key(|b| b.timestamp);

        let patterns: Vec<_> = self
            .extractor
            .extract(&bars, &gap.symbol, gap.timeframe)
            .collect();
        if patterns.is_empty() {
            info!(
                "No patterns extracted from {} bars for {}:{} gap",
                bars.len(),
                gap.symbol,
                gap.timeframe
            );
            return (0, None);
        }

        let outcome = self.index.insert_batch(&patterns, on_progress).await;
        (outcome.inserted, outcome.failure)
    }

    /// Detect all gaps and fill them sequentially, pausing between gaps for
    /// the shared rate-limited source. A single gap's failure is recorded
    /// and the remaining gaps are still attempted.
    #[instrument(skip(self, on_progress))]
    pub async fn fill_all_gaps(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        max_history_days: i64,
        on_progress: Option<&ProgressFn>,
    ) -> ArchiveResult<BackfillReport> {
        let gaps = self
            .detector
            .detect_gaps(symbol, timeframe, max_history_days)
            .await?;
        info!(
            "Backfilling {} gaps for {}:{} over {} days",
            gaps.len(),
            symbol,
            timeframe,
            max_history_days
        );

        let mut report = BackfillReport::default();
        for (i, gap) in gaps.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.inter_gap_delay_ms)).await;
            }
            report.gaps_attempted += 1;

            let (inserted, failure) = self.fill_gap_inner(gap, on_progress).await;
            report.patterns_inserted += inserted;
            if let Some(e) = failure {
                warn!(
                    "Continuing past failed {} gap [{} - {}]: {}",
                    gap.kind, gap.start, gap.end, e
                );
                report.failures.push((gap.clone(), e.to_string()));
            }
        }

        info!(
            "Backfill done for {}:{}: {} patterns inserted, {} gaps failed",
            symbol,
            timeframe,
            report.patterns_inserted,
            report.failures.len()
        );
        Ok(report)
    }

    /// Fast-path catch-up: look up only the latest indexed timestamp and
    /// fill the trailing gap if more than two intervals have elapsed.
    /// No-op when the index is empty or already current.
    #[instrument(skip(self, on_progress))]
    pub async fn update_to_now(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        on_progress: Option<&ProgressFn>,
    ) -> ArchiveResult<usize> {
        let latest = match self
            .index
            .latest_window_start(symbol, timeframe.label())
            .await?
        {
            Some(ts) => ts,
            None => {
                info!(
                    "No indexed patterns for {}:{}; use a full backfill instead",
                    symbol, timeframe
                );
                return Ok(0);
            }
        };

        let now = Utc::now();
        if now - latest <= timeframe.interval() * 2 {
            return Ok(0);
        }

        let gap = DataGap {
            symbol: symbol.to_string(),
            timeframe,
            start: latest + timeframe.interval(),
            end: now,
            estimated_candles: ((now - latest).num_minutes() / timeframe.minutes()).max(0) as u64,
            kind: GapKind::Recent,
        };
        self.fill_gap(&gap, on_progress).await
    }

    /// Rough wall-clock estimate for filling a gap, from the source's rate
    /// limit and a fixed per-batch processing cost. Informational only.
    pub fn estimate_fill_time(&self, gap: &DataGap) -> f64 {
        let per_request = self.source.bars_per_request().max(1) as u64;
        let requests = gap.estimated_candles.div_ceil(per_request).max(1);
        let requests_per_sec = self.source.rate_limit_per_minute().max(1) as f64 / 60.0;
        requests as f64 / requests_per_sec + requests as f64 * self.config.per_batch_cost_secs
    }
}
