pub mod backend;
pub mod memory;
pub mod qdrant;

pub use self::backend::{CollectionInfo, PointRecord, ScoredPoint, SearchFilter, VectorBackend};
pub use self::memory::MemoryBackend;
pub use self::qdrant::QdrantBackend;

use crate::error::{ArchiveError, ArchiveResult};
use crate::models::{OutcomeLabel, Pattern, TrendDirection};
use crate::patterns::PatternEmbedder;
use crate::util::with_timeout;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Progress callback: (completed, total), invoked after each batch.
pub type ProgressFn = dyn Fn(usize, usize) + Send + Sync;

#[derive(Debug, Clone)]
pub struct IndexConfig {
    pub collection: String,
    /// Upper bound on points per upsert request.
    pub batch_size: usize,
    /// Default minimum similarity score for search results.
    pub score_threshold: f64,
    /// Per-call timeout for backend I/O.
    pub timeout_ms: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            collection: "patterns".to_string(),
            batch_size: 500,
            score_threshold: 0.7,
            timeout_ms: 10_000,
        }
    }
}

/// A similarity hit with the denormalized metadata statistics need.
#[derive(Debug, Clone)]
pub struct PatternMatch {
    pub id: String,
    pub score: f64,
    pub symbol: String,
    pub trend: TrendDirection,
    pub outcome_label: Option<OutcomeLabel>,
    pub outcome_return_pct: Option<f64>,
}

/// Aggregate statistics over a set of matches.
#[derive(Debug, Clone, Default)]
pub struct MatchStatistics {
    pub count: usize,
    /// Computed over win/loss labels only; 0.5 when none are labeled.
    pub win_rate: f64,
    pub mean_return: f64,
    pub median_return: f64,
    pub std_return: f64,
    pub mean_score: f64,
    pub min_score: f64,
    pub max_score: f64,
}

/// Outcome of a batched insert. Batches already sent stay durable; a
/// failure partway through reports the count committed before it.
#[derive(Debug)]
pub struct InsertOutcome {
    pub inserted: usize,
    pub failure: Option<ArchiveError>,
}

/// Persistence and similarity-search boundary over a vector backend.
/// Stateless per call aside from the backend connection; safe for
/// concurrent use across (symbol, timeframe) keys.
pub struct PatternIndex {
    backend: Arc<dyn VectorBackend>,
    embedder: PatternEmbedder,
    config: IndexConfig,
}

impl PatternIndex {
    pub fn new(
        backend: Arc<dyn VectorBackend>,
        embedder: PatternEmbedder,
        config: IndexConfig,
    ) -> Self {
        Self {
            backend,
            embedder,
            config,
        }
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn embedder(&self) -> &PatternEmbedder {
        &self.embedder
    }

    /// Idempotent creation of the backing collection with the embedder's
    /// dimension, cosine distance, and keyword payload indexes.
    pub async fn ensure_collection(&self) -> ArchiveResult<()> {
        with_timeout(
            self.config.timeout_ms,
            self.backend
                .ensure_collection(&self.config.collection, self.embedder.dimension()),
        )
        .await
    }

    /// Embed and write patterns in bounded batches. Returns the count
    /// actually written; on a mid-run failure the outcome carries both the
    /// committed count and the error (no implicit rollback).
    pub async fn insert_batch(
        &self,
        patterns: &[Pattern],
        on_progress: Option<&ProgressFn>,
    ) -> InsertOutcome {
        let total = patterns.len();
        let mut inserted = 0;

        for chunk in patterns.chunks(self.config.batch_size.max(1)) {
            let points: Vec<PointRecord> = chunk
                .iter()
                .map(|p| PointRecord {
                    id: Uuid::new_v4().to_string(),
                    vector: self
                        .embedder
                        .embed(p)
                        .into_iter()
                        .map(|v| v as f32)
                        .collect(),
                    payload: pattern_payload(p),
                })
                .collect();

            let write = with_timeout(
                self.config.timeout_ms,
                self.backend.upsert(&self.config.collection, points),
            )
            .await;

            match write {
                Ok(()) => {
                    inserted += chunk.len();
                    if let Some(progress) = on_progress {
                        progress(inserted, total);
                    }
                }
                Err(e) => {
                    error!(
                        "Batch insert failed after {} of {} patterns: {}",
                        inserted, total, e
                    );
                    return InsertOutcome {
                        inserted,
                        failure: Some(e),
                    };
                }
            }
        }

        debug!("Inserted {} patterns into '{}'", inserted, self.config.collection);
        InsertOutcome {
            inserted,
            failure: None,
        }
    }

    /// Embed the query pattern and run a filtered nearest-neighbor search.
    /// `score_threshold` overrides the configured default when given.
    pub async fn search(
        &self,
        query: &Pattern,
        limit: usize,
        filter: &SearchFilter,
        score_threshold: Option<f64>,
    ) -> ArchiveResult<Vec<PatternMatch>> {
        let vector: Vec<f32> = self
            .embedder
            .embed(query)
            .into_iter()
            .map(|v| v as f32)
            .collect();
        let threshold = score_threshold.unwrap_or(self.config.score_threshold);

        let hits = with_timeout(
            self.config.timeout_ms,
            self.backend
                .search(&self.config.collection, &vector, limit, filter, threshold),
        )
        .await?;

        let mut matches = Vec::with_capacity(hits.len());
        for hit in hits {
            match parse_match(hit) {
                Ok(m) => matches.push(m),
                Err(e) => warn!("Skipping malformed record: {}", e),
            }
        }
        Ok(matches)
    }

    /// Aggregate statistics over a match set. Win rate counts only
    /// win/loss-labeled matches in its denominator; unlabeled and neutral
    /// matches still count toward `count`.
    pub fn statistics(matches: &[PatternMatch]) -> MatchStatistics {
        if matches.is_empty() {
            return MatchStatistics {
                win_rate: 0.5,
                ..Default::default()
            };
        }

        let wins = matches
            .iter()
            .filter(|m| m.outcome_label == Some(OutcomeLabel::Win))
            .count();
        let losses = matches
            .iter()
            .filter(|m| m.outcome_label == Some(OutcomeLabel::Loss))
            .count();
        let win_rate = if wins + losses > 0 {
            wins as f64 / (wins + losses) as f64
        } else {
            0.5
        };

        let mut returns: Vec<f64> = matches.iter().filter_map(|m| m.outcome_return_pct).collect();
        returns.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let (mean_return, median_return, std_return) = if returns.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            let mean = returns.iter().sum::<f64>() / returns.len() as f64;
            let median = if returns.len() % 2 == 1 {
                returns[returns.len() / 2]
            } else {
                (returns[returns.len() / 2 - 1] + returns[returns.len() / 2]) / 2.0
            };
            let var = returns.iter().map(|r| (r - mean) * (r - mean)).sum::<f64>()
                / returns.len() as f64;
            (mean, median, var.sqrt())
        };

        let scores: Vec<f64> = matches.iter().map(|m| m.score).collect();
        MatchStatistics {
            count: matches.len(),
            win_rate,
            mean_return,
            median_return,
            std_return,
            mean_score: scores.iter().sum::<f64>() / scores.len() as f64,
            min_score: scores.iter().copied().fold(f64::MAX, f64::min),
            max_score: scores.iter().copied().fold(f64::MIN, f64::max),
        }
    }

    /// All indexed window-start timestamps for (symbol, timeframe), sorted
    /// ascending. O(n) over the collection; background reconciliation only.
    pub async fn window_start_timestamps(
        &self,
        symbol: &str,
        timeframe: &str,
    ) -> ArchiveResult<Vec<DateTime<Utc>>> {
        let filter = SearchFilter {
            symbol: Some(symbol.to_string()),
            timeframe: Some(timeframe.to_string()),
            ..Default::default()
        };
        let payloads = with_timeout(
            self.config.timeout_ms,
            self.backend.scroll_payloads(&self.config.collection, &filter),
        )
        .await?;

        let mut timestamps: Vec<DateTime<Utc>> = payloads
            .iter()
            .filter_map(|p| p.get("window_start_ts").and_then(Value::as_i64))
            .filter_map(|secs| Utc.timestamp_opt(secs, 0).single())
            .collect();
        timestamps.sort();
        Ok(timestamps)
    }

    /// Latest indexed window-start for (symbol, timeframe), if any.
    pub async fn latest_window_start(
        &self,
        symbol: &str,
        timeframe: &str,
    ) -> ArchiveResult<Option<DateTime<Utc>>> {
        Ok(self
            .window_start_timestamps(symbol, timeframe)
            .await?
            .into_iter()
            .last())
    }

    pub async fn collection_info(&self) -> ArchiveResult<CollectionInfo> {
        with_timeout(
            self.config.timeout_ms,
            self.backend.collection_info(&self.config.collection),
        )
        .await
    }

    pub async fn delete_collection(&self) -> ArchiveResult<()> {
        let res = with_timeout(
            self.config.timeout_ms,
            self.backend.delete_collection(&self.config.collection),
        )
        .await;
        if res.is_ok() {
            info!("Collection '{}' deleted", self.config.collection);
        }
        res
    }
}

/// Flatten a pattern into the key/value payload stored beside its vector.
fn pattern_payload(p: &Pattern) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("symbol".to_string(), json!(p.symbol));
    payload.insert("timeframe".to_string(), json!(p.timeframe.label()));
    payload.insert("window_start".to_string(), json!(p.window_start.to_rfc3339()));
    payload.insert("window_end".to_string(), json!(p.window_end.to_rfc3339()));
    payload.insert("window_start_ts".to_string(), json!(p.window_start.timestamp()));
    payload.insert("price_change_pct".to_string(), json!(p.price_change_pct));
    payload.insert("volatility".to_string(), json!(p.volatility));
    payload.insert("trend".to_string(), json!(p.trend.to_string()));
    payload.insert("volume_trend".to_string(), json!(p.volume_trend.to_string()));
    if let Some(outcome) = &p.outcome {
        payload.insert("outcome_bars".to_string(), json!(outcome.bars));
        payload.insert("outcome_return_pct".to_string(), json!(outcome.return_pct));
        payload.insert(
            "outcome_drawdown_pct".to_string(),
            json!(outcome.max_drawdown_pct),
        );
        payload.insert("outcome_label".to_string(), json!(outcome.label.to_string()));
    }
    payload
}

fn parse_match(hit: ScoredPoint) -> ArchiveResult<PatternMatch> {
    let missing = |field: &str| ArchiveError::MalformedRecord {
        id: hit.id.clone(),
        field: field.to_string(),
    };

    let symbol = hit
        .payload
        .get("symbol")
        .and_then(Value::as_str)
        .ok_or_else(|| missing("symbol"))?
        .to_string();
    let trend = hit
        .payload
        .get("trend")
        .and_then(Value::as_str)
        .and_then(TrendDirection::parse)
        .ok_or_else(|| missing("trend"))?;
    let outcome_label = hit
        .payload
        .get("outcome_label")
        .and_then(Value::as_str)
        .and_then(OutcomeLabel::parse);
    let outcome_return_pct = hit.payload.get("outcome_return_pct").and_then(Value::as_f64);

    Ok(PatternMatch {
        id: hit.id,
        score: hit.score,
        symbol,
        trend,
        outcome_label,
        outcome_return_pct,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(score: f64, label: Option<OutcomeLabel>, ret: Option<f64>) -> PatternMatch {
        PatternMatch {
            id: "x".to_string(),
            score,
            symbol: "BTCUSDT".to_string(),
            trend: TrendDirection::Up,
            outcome_label: label,
            outcome_return_pct: ret,
        }
    }

    #[test]
    fn test_statistics_win_rate_excludes_neutral() {
        let matches = vec![
            m(0.9, Some(OutcomeLabel::Win), Some(2.0)),
            m(0.8, Some(OutcomeLabel::Loss), Some(-1.0)),
            m(0.7, Some(OutcomeLabel::Neutral), Some(0.1)),
            m(0.6, None, None),
        ];
        let stats = PatternIndex::statistics(&matches);
        assert_eq!(stats.count, 4);
        // 1 win / (1 win + 1 loss)
        assert!((stats.win_rate - 0.5).abs() < 1e-10);
    }

    #[test]
    fn test_statistics_score_aggregates() {
        let matches = vec![
            m(0.9, Some(OutcomeLabel::Win), Some(3.0)),
            m(0.7, Some(OutcomeLabel::Win), Some(1.0)),
        ];
        let stats = PatternIndex::statistics(&matches);
        assert!((stats.win_rate - 1.0).abs() < 1e-10);
        assert!((stats.mean_score - 0.8).abs() < 1e-10);
        assert!((stats.min_score - 0.7).abs() < 1e-10);
        assert!((stats.max_score - 0.9).abs() < 1e-10);
        assert!((stats.mean_return - 2.0).abs() < 1e-10);
        assert!((stats.median_return - 2.0).abs() < 1e-10);
        assert!((stats.std_return - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_statistics_empty_is_neutral() {
        let stats = PatternIndex::statistics(&[]);
        assert_eq!(stats.count, 0);
        assert!((stats.win_rate - 0.5).abs() < 1e-10);
    }

    #[test]
    fn test_parse_match_missing_trend_is_malformed() {
        let mut payload = Map::new();
        payload.insert("symbol".to_string(), json!("BTCUSDT"));
        let err = parse_match(ScoredPoint {
            id: "p1".to_string(),
            score: 0.9,
            payload,
        })
        .unwrap_err();
        assert!(matches!(err, ArchiveError::MalformedRecord { .. }));
    }
}
