use crate::error::ArchiveResult;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Payload fields that get a keyword index so filtered queries avoid a full
/// scan.
pub const INDEXED_FIELDS: [&str; 4] = ["symbol", "timeframe", "trend", "outcome_label"];

/// A point to be written to the similarity index: opaque id, unit vector,
/// flat key/value payload. Never updated in place; corrections are
/// delete + reinsert.
#[derive(Debug, Clone)]
pub struct PointRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Map<String, Value>,
}

/// Keyword-equality filter over the indexed payload fields. `None` fields
/// are unconstrained.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub symbol: Option<String>,
    pub timeframe: Option<String>,
    pub trend: Option<String>,
    pub outcome_label: Option<String>,
}

impl SearchFilter {
    pub fn is_empty(&self) -> bool {
        self.symbol.is_none()
            && self.timeframe.is_none()
            && self.trend.is_none()
            && self.outcome_label.is_none()
    }

    /// (field, value) pairs for the constrained fields.
    pub fn pairs(&self) -> Vec<(&'static str, &str)> {
        let mut out = Vec::new();
        if let Some(v) = &self.symbol {
            out.push(("symbol", v.as_str()));
        }
        if let Some(v) = &self.timeframe {
            out.push(("timeframe", v.as_str()));
        }
        if let Some(v) = &self.trend {
            out.push(("trend", v.as_str()));
        }
        if let Some(v) = &self.outcome_label {
            out.push(("outcome_label", v.as_str()));
        }
        out
    }

    /// Whether a payload satisfies every constrained field.
    pub fn matches(&self, payload: &Map<String, Value>) -> bool {
        self.pairs()
            .iter()
            .all(|(field, want)| payload.get(*field).and_then(Value::as_str) == Some(*want))
    }
}

/// A similarity-search hit: id, cosine score, payload without the vector.
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f64,
    pub payload: Map<String, Value>,
}

/// Collection introspection result.
#[derive(Debug, Clone)]
pub struct CollectionInfo {
    pub name: String,
    pub points_count: u64,
    pub status: String,
}

/// Wire-level boundary to a vector similarity store. Any backend providing
/// a named cosine-distance collection, keyword filtering, batched upsert,
/// thresholded top-k search, payload scroll, and introspection/deletion is
/// substitutable here.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Idempotent collection creation with the given vector dimension and
    /// keyword indexes on `INDEXED_FIELDS`.
    async fn ensure_collection(&self, name: &str, dimension: usize) -> ArchiveResult<()>;

    /// Batched point upsert by opaque id.
    async fn upsert(&self, name: &str, points: Vec<PointRecord>) -> ArchiveResult<()>;

    /// Filtered top-k similarity search; results below `score_threshold`
    /// are excluded.
    async fn search(
        &self,
        name: &str,
        vector: &[f32],
        limit: usize,
        filter: &SearchFilter,
        score_threshold: f64,
    ) -> ArchiveResult<Vec<ScoredPoint>>;

    /// Full payload-without-vector read of every point matching the filter.
    /// O(collection size); meant for background reconciliation only.
    async fn scroll_payloads(
        &self,
        name: &str,
        filter: &SearchFilter,
    ) -> ArchiveResult<Vec<Map<String, Value>>>;

    async fn collection_info(&self, name: &str) -> ArchiveResult<CollectionInfo>;

    async fn delete_collection(&self, name: &str) -> ArchiveResult<()>;
}
