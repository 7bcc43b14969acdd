use crate::error::ArchiveResult;
use crate::index::PatternIndex;
use crate::models::Timeframe;
use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Size/position classification of a gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapKind {
    /// Nothing indexed yet; the whole history range is missing.
    Initial,
    /// Missing head before the earliest indexed pattern.
    Historical,
    /// Interior gap, <= 10 estimated candles.
    Small,
    /// Interior gap, <= 500 estimated candles.
    Medium,
    /// Interior gap, > 500 estimated candles.
    Large,
    /// Missing tail between the latest indexed pattern and now.
    Recent,
}

impl fmt::Display for GapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GapKind::Initial => "initial",
            GapKind::Historical => "historical",
            GapKind::Small => "small",
            GapKind::Medium => "medium",
            GapKind::Large => "large",
            GapKind::Recent => "recent",
        };
        write!(f, "{}", s)
    }
}

/// A time range for (symbol, timeframe) not yet represented in the index.
/// Computed on demand, never persisted.
#[derive(Debug, Clone)]
pub struct DataGap {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub estimated_candles: u64,
    pub kind: GapKind,
}

impl DataGap {
    fn new(
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        kind: Option<GapKind>,
    ) -> Option<Self> {
        let minutes = (end - start).num_minutes();
        if minutes <= 0 {
            return None;
        }
        let estimated = (minutes / timeframe.minutes()) as u64;
        if estimated == 0 {
            return None;
        }
        let kind = kind.unwrap_or(if estimated <= 10 {
            GapKind::Small
        } else if estimated <= 500 {
            GapKind::Medium
        } else {
            GapKind::Large
        });
        Some(Self {
            symbol: symbol.to_string(),
            timeframe,
            start,
            end,
            estimated_candles: estimated,
            kind,
        })
    }
}

/// Read-only reconciliation scan over the index. Scrolling every indexed
/// timestamp is O(index size); run it from periodic background jobs, not on
/// a latency-sensitive path.
pub struct GapDetector {
    index: Arc<PatternIndex>,
}

impl GapDetector {
    pub fn new(index: Arc<PatternIndex>) -> Self {
        Self { index }
    }

    /// Gaps for (symbol, timeframe) over the trailing `max_history_days`,
    /// ordered by start time.
    pub async fn detect_gaps(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        max_history_days: i64,
    ) -> ArchiveResult<Vec<DataGap>> {
        self.detect_gaps_at(symbol, timeframe, max_history_days, Utc::now())
            .await
    }

    /// Same as `detect_gaps` with an explicit "now", for deterministic
    /// reconciliation in tests.
    pub async fn detect_gaps_at(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        max_history_days: i64,
        now: DateTime<Utc>,
    ) -> ArchiveResult<Vec<DataGap>> {
        let history_start = now - Duration::days(max_history_days);
        let interval = timeframe.interval();
        let stale_after = interval * 2;

        let timestamps = self
            .index
            .window_start_timestamps(symbol, timeframe.label())
            .await?;

        if timestamps.is_empty() {
            info!(
                "No indexed patterns for {}:{}; whole {}-day history is one gap",
                symbol, timeframe, max_history_days
            );
            return Ok(
                DataGap::new(symbol, timeframe, history_start, now, Some(GapKind::Initial))
                    .into_iter()
                    .collect(),
            );
        }

        let mut gaps = Vec::new();

        // (a) Missing head before the earliest indexed pattern.
        if timestamps[0] > history_start {
            gaps.extend(DataGap::new(
                symbol,
                timeframe,
                history_start,
                timestamps[0],
                Some(GapKind::Historical),
            ));
        }

        // (b) Interior gaps where consecutive indexed starts sit more than
        // two intervals apart. Bounds exclude the already-indexed starts.
        for pair in timestamps.windows(2) {
            if pair[1] - pair[0] > stale_after {
                gaps.extend(DataGap::new(
                    symbol,
                    timeframe,
                    pair[0] + interval,
                    pair[1] - interval,
                    None,
                ));
            }
        }

        // (c) Missing tail up to the present.
        let latest = timestamps[timestamps.len() - 1];
        if now - latest > stale_after {
            gaps.extend(DataGap::new(
                symbol,
                timeframe,
                latest + interval,
                now,
                Some(GapKind::Recent),
            ));
        }

        debug!(
            "Detected {} gaps for {}:{} across {} indexed timestamps",
            gaps.len(),
            symbol,
            timeframe,
            timestamps.len()
        );
        Ok(gaps)
    }
}
