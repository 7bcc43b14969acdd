use crate::error::{ArchiveError, ArchiveResult};
use crate::index::backend::{
    CollectionInfo, PointRecord, ScoredPoint, SearchFilter, VectorBackend,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;

struct Collection {
    dimension: usize,
    points: HashMap<String, (Vec<f32>, Map<String, Value>)>,
}

/// In-memory vector backend with cosine scoring. Backs the `memory` mode
/// and the test suite; the wire contract matches the remote backend.
#[derive(Default)]
pub struct MemoryBackend {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut na = 0.0f64;
    let mut nb = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += *x as f64 * *y as f64;
        na += *x as f64 * *x as f64;
        nb += *y as f64 * *y as f64;
    }
    if na < f64::EPSILON || nb < f64::EPSILON {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

#[async_trait]
impl VectorBackend for MemoryBackend {
    async fn ensure_collection(&self, name: &str, dimension: usize) -> ArchiveResult<()> {
        let mut collections = self.collections.write();
        collections.entry(name.to_string()).or_insert(Collection {
            dimension,
            points: HashMap::new(),
        });
        Ok(())
    }

    async fn upsert(&self, name: &str, points: Vec<PointRecord>) -> ArchiveResult<()> {
        let mut collections = self.collections.write();
        let collection = collections
            .get_mut(name)
            .ok_or_else(|| ArchiveError::NotFound(format!("collection '{}'", name)))?;
        for p in points {
            collection.points.insert(p.id, (p.vector, p.payload));
        }
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
        let collections = self.collections.read();
        let collection = collections
            .get(name)
            .ok_or_else(|| ArchiveError::NotFound(format!("collection '{}'", name)))?;

        let mut hits: Vec<ScoredPoint> = collection
            .points
            .iter()
            .filter(|(_, (_, payload))| filter.matches(payload))
            .map(|(id, (v, payload))| ScoredPoint {
                id: id.clone(),
                score: cosine(vector, v),
                payload: payload.clone(),
            })
            .filter(|hit| hit.score >= score_threshold)
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn scroll_payloads(
        &self,
        name: &str,
        filter: &SearchFilter,
    ) -> ArchiveResult<Vec<Map<String, Value>>> {
        let collections = self.collections.read();
        let collection = collections
            .get(name)
            .ok_or_else(|| ArchiveError::NotFound(format!("collection '{}'", name)))?;
        Ok(collection
            .points
            .values()
            .filter(|(_, payload)| filter.matches(payload))
            .map(|(_, payload)| payload.clone())
            .collect())
    }

    async fn collection_info(&self, name: &str) -> ArchiveResult<CollectionInfo> {
        let collections = self.collections.read();
        let collection = collections
            .get(name)
            .ok_or_else(|| ArchiveError::NotFound(format!("collection '{}'", name)))?;
        Ok(CollectionInfo {
            name: name.to_string(),
            points_count: collection.points.len() as u64,
            status: format!("green (dim {})", collection.dimension),
        })
    }

    async fn delete_collection(&self, name: &str) -> ArchiveResult<()> {
        let mut collections = self.collections.write();
        collections
            .remove(name)
            .ok_or_else(|| ArchiveError::NotFound(format!("collection '{}'", name)))?;
        Ok(())
    }
}
