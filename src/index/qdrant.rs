use crate::error::{ArchiveError, ArchiveResult};
use crate::index::backend::{
    CollectionInfo, PointRecord, ScoredPoint, SearchFilter, VectorBackend, INDEXED_FIELDS,
};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Qdrant-compatible REST backend. Talks plain HTTP+JSON so any server
/// honoring the collections/points API is usable; no SDK involved.
pub struct QdrantBackend {
    client: reqwest::Client,
    base_url: String,
    timeout_ms: u64,
}

impl QdrantBackend {
    pub fn new(base_url: &str, timeout_ms: u64) -> ArchiveResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| ArchiveError::BackendUnavailable(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout_ms,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn map_err(&self, e: reqwest::Error) -> ArchiveError {
        if e.is_timeout() {
            ArchiveError::Timeout(self.timeout_ms)
        } else {
            ArchiveError::BackendUnavailable(e.to_string())
        }
    }

    /// Unwrap the `{"result": ..., "status": "ok"}` envelope, mapping HTTP
    /// failures onto the error taxonomy.
    async fn into_result(&self, resp: reqwest::Response) -> ArchiveResult<Value> {
        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ArchiveError::NotFound(
                resp.text().await.unwrap_or_default(),
            ));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ArchiveError::BackendUnavailable(format!(
                "HTTP {}: {}",
                status, body
            )));
        }
        let mut body: Value = resp.json().await.map_err(|e| self.map_err(e))?;
        Ok(body.get_mut("result").map(Value::take).unwrap_or(Value::Null))
    }

    fn filter_clause(filter: &SearchFilter) -> Option<Value> {
        if filter.is_empty() {
            return None;
        }
        let must: Vec<Value> = filter
            .pairs()
            .into_iter()
            .map(|(field, value)| json!({ "key": field, "match": { "value": value } }))
            .collect();
        Some(json!({ "must": must }))
    }
}

#[async_trait]
impl VectorBackend for QdrantBackend {
    async fn ensure_collection(&self, name: &str, dimension: usize) -> ArchiveResult<()> {
        // Existing collection: nothing to do.
        let resp = self
            .client
            .get(self.url(&format!("/collections/{}", name)))
            .send()
            .await
            .map_err(|e| self.map_err(e))?;
        if resp.status().is_success() {
            debug!("Collection '{}' already exists", name);
            return Ok(());
        }

        let body = json!({
            "vectors": { "size": dimension, "distance": "Cosine" }
        });
        let resp = self
            .client
            .put(self.url(&format!("/collections/{}", name)))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_err(e))?;
        self.into_result(resp).await?;
        info!("Created collection '{}' (dim {}, cosine)", name, dimension);

        // Keyword indexes so filtered queries avoid full scans.
        for field in INDEXED_FIELDS {
            let body = json!({ "field_name": field, "field_schema": "keyword" });
            let resp = self
                .client
                .put(self.url(&format!("/collections/{}/index", name)))
                .json(&body)
                .send()
                .await
                .map_err(|e| self.map_err(e))?;
            if let Err(e) = self.into_result(resp).await {
                // An index that already exists is fine.
                warn!("Payload index on '{}' not created: {}", field, e);
            }
        }
        Ok(())
    }

    async fn upsert(&self, name: &str, points: Vec<PointRecord>) -> ArchiveResult<()> {
        let body = json!({
            "points": points
                .into_iter()
                .map(|p| json!({ "id": p.id, "vector": p.vector, "payload": p.payload }))
                .collect::<Vec<Value>>()
        });
        let resp = self
            .client
            .put(self.url(&format!("/collections/{}/points?wait=true", name)))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_err(e))?;
        self.into_result(resp).await?;
        Ok(())
    }

    async fn search(
        &self,
        name: &str,
        vector: &[f32],
        limit: usize,
        filter: &SearchFilter,
        score_threshold: f64,
    ) -> ArchiveResult<Vec<ScoredPoint>> {
        let mut body = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
            "score_threshold": score_threshold,
        });
        if let Some(clause) = Self::filter_clause(filter) {
            body["filter"] = clause;
        }
        let resp = self
            .client
            .post(self.url(&format!("/collections/{}/points/search", name)))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_err(e))?;
        let result = self.into_result(resp).await?;

        let hits = result
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|hit| {
                let id = hit.get("id")?.as_str().map(str::to_string).or_else(|| {
                    hit.get("id").and_then(Value::as_u64).map(|n| n.to_string())
                })?;
                let score = hit.get("score")?.as_f64()?;
                let payload = hit
                    .get("payload")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                Some(ScoredPoint { id, score, payload })
            })
            .collect();
        Ok(hits)
    }

    async fn scroll_payloads(
        &self,
        name: &str,
        filter: &SearchFilter,
    ) -> ArchiveResult<Vec<Map<String, Value>>> {
        let mut payloads = Vec::new();
        let mut offset: Option<Value> = None;

        loop {
            let mut body = json!({
                "limit": 1024,
                "with_payload": true,
                "with_vector": false,
            });
            if let Some(clause) = Self::filter_clause(filter) {
                body["filter"] = clause;
            }
            if let Some(off) = &offset {
                body["offset"] = off.clone();
            }
            let resp = self
                .client
                .post(self.url(&format!("/collections/{}/points/scroll", name)))
                .json(&body)
                .send()
                .await
                .map_err(|e| self.map_err(e))?;
            let result = self.into_result(resp).await?;

            if let Some(points) = result.get("points").and_then(Value::as_array) {
                for p in points {
                    if let Some(payload) = p.get("payload").and_then(Value::as_object) {
                        payloads.push(payload.clone());
                    }
                }
            }
            match result.get("next_page_offset") {
                Some(next) if !next.is_null() => offset = Some(next.clone()),
                _ => break,
            }
        }
        Ok(payloads)
    }

    async fn collection_info(&self, name: &str) -> ArchiveResult<CollectionInfo> {
        let resp = self
            .client
            .get(self.url(&format!("/collections/{}", name)))
            .send()
            .await
            .map_err(|e| self.map_err(e))?;
        let result = self.into_result(resp).await?;
        Ok(CollectionInfo {
            name: name.to_string(),
            points_count: result
                .get("points_count")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            status: result
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
        })
    }

    async fn delete_collection(&self, name: &str) -> ArchiveResult<()> {
        let resp = self
            .client
            .delete(self.url(&format!("/collections/{}", name)))
            .send()
            .await
            .map_err(|e| self.map_err(e))?;
        self.into_result(resp).await?;
        info!("Deleted collection '{}'", name);
        Ok(())
    }
}
