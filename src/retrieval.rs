//! Concurrent batch retrieval of resources by id.
//!
//! A batch resolves up to [`MAX_BATCH_IDS`] ids of one kind. Cache hits are
//! answered immediately; misses are fetched as independent tasks behind a
//! semaphore. A failing id produces an [`ErrorDescriptor`] in its slot and
//! never fails the batch. Results come back in request order regardless of
//! completion order.

use crate::cache::{CacheSource, SharedCaches};
use crate::constants::MAX_BATCH_IDS;
use crate::error::{ResourceRef, ServerError};
use crate::gateway::ApiGateway;
use crate::optimizer::{optimize, OptimizedRecord};
use crate::resource::ResourceKind;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Per-id failure inside a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDescriptor {
    pub id: u64,
    /// Upstream HTTP status, when the failure came from Metabase.
    pub status: Option<u16>,
    pub code: String,
    pub message: String,
    pub agent_guidance: String,
}

impl ErrorDescriptor {
    pub fn from_error(id: u64, error: &ServerError) -> Self {
        Self {
            id,
            status: error.status(),
            code: error.code().to_string(),
            message: error.to_string(),
            agent_guidance: error.agent_guidance(),
        }
    }
}

/// One slot of a batch result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BatchItem {
    Found {
        id: u64,
        source: CacheSource,
        data: OptimizedRecord,
    },
    Failed {
        id: u64,
        error: ErrorDescriptor,
    },
}

impl BatchItem {
    pub fn id(&self) -> u64 {
        match self {
            BatchItem::Found { id, .. } | BatchItem::Failed { id, .. } => *id,
        }
    }

    pub fn record(&self) -> Option<&OptimizedRecord> {
        match self {
            BatchItem::Found { data, .. } => Some(data),
            BatchItem::Failed { .. } => None,
        }
    }

    pub fn source(&self) -> Option<CacheSource> {
        match self {
            BatchItem::Found { source, .. } => Some(*source),
            BatchItem::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&ErrorDescriptor> {
        match self {
            BatchItem::Found { .. } => None,
            BatchItem::Failed { error, .. } => Some(error),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchMeta {
    pub requested: usize,
    pub cache_hits: usize,
    pub live_fetches: usize,
    pub errors: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResult {
    pub model: ResourceKind,
    pub results: Vec<BatchItem>,
    pub meta: BatchMeta,
}

/// Validate and de-duplicate requested ids, keeping first-occurrence order.
pub fn validate_ids(ids: &[i64]) -> Result<Vec<u64>, ServerError> {
    if ids.is_empty() {
        return Err(ServerError::validation(
            "ids",
            "at least one id is required",
            "Pass one or more positive integer ids, e.g. ids=[1, 2, 3]. Use `list` or `search` to find ids.",
        ));
    }

    if ids.len() > MAX_BATCH_IDS {
        return Err(ServerError::validation(
            "ids",
            format!("at most {MAX_BATCH_IDS} ids per call, got {}", ids.len()),
            format!("Split the request into calls of {MAX_BATCH_IDS} ids or fewer."),
        ));
    }

    if let Some(bad) = ids.iter().find(|id| **id <= 0) {
        return Err(ServerError::validation(
            "ids",
            format!("ids must be positive integers, got {bad}"),
            "Remove zero or negative ids. Metabase ids start at 1.",
        ));
    }

    let mut seen = HashSet::with_capacity(ids.len());
    Ok(ids
        .iter()
        .map(|id| *id as u64)
        .filter(|id| seen.insert(*id))
        .collect())
}

async fn fetch_one(
    gateway: &dyn ApiGateway,
    kind: ResourceKind,
    id: u64,
) -> Result<OptimizedRecord, ServerError> {
    let raw = gateway.get(&kind.item_path(id)).await?;
    optimize(kind, raw)
}

/// Resolves batches of ids against the item caches and the gateway.
#[derive(Clone)]
pub struct BatchRetriever {
    gateway: Arc<dyn ApiGateway>,
    caches: SharedCaches,
    concurrency: usize,
}

impl BatchRetriever {
    pub fn new(gateway: Arc<dyn ApiGateway>, caches: SharedCaches, concurrency: usize) -> Self {
        Self {
            gateway,
            caches,
            concurrency: concurrency.max(1),
        }
    }

    /// Maximum concurrent upstream fetches per batch.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Resolve `ids` of one kind. Only id validation can fail the whole call.
    pub async fn retrieve(
        &self,
        kind: ResourceKind,
        ids: &[i64],
    ) -> Result<BatchResult, ServerError> {
        let start = Instant::now();
        let ids = validate_ids(ids)?;
        let store = self.caches.items(kind);

        let mut cached: Vec<Option<OptimizedRecord>> = Vec::with_capacity(ids.len());
        let mut misses = Vec::new();
        for id in &ids {
            let hit = store.get(id);
            if hit.is_none() {
                misses.push(*id);
            }
            cached.push(hit);
        }

        debug!(
            kind = %kind,
            requested = ids.len(),
            hits = ids.len() - misses.len(),
            misses = misses.len(),
            "Resolving batch"
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let handles: Vec<(u64, JoinHandle<Result<OptimizedRecord, ServerError>>)> = misses
            .iter()
            .map(|&id| {
                let gateway = Arc::clone(&self.gateway);
                let caches = Arc::clone(&self.caches);
                let semaphore = Arc::clone(&semaphore);
                let handle = tokio::spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|_| ServerError::internal("batch semaphore closed"))?;
                    let record = fetch_one(gateway.as_ref(), kind, id)
                        .await
                        .map_err(|e| e.for_resource(ResourceRef::item(kind, id)))?;
                    caches.items(kind).set(id, record.clone());
                    Ok::<_, ServerError>(record)
                });
                (id, handle)
            })
            .collect();

        let mut fetched = Vec::with_capacity(handles.len());
        for (id, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => Err(ServerError::internal(format!("fetch task failed: {e}"))),
            };
            fetched.push((id, outcome));
        }
        let mut fetched = fetched.into_iter();

        let mut meta = BatchMeta {
            requested: ids.len(),
            ..BatchMeta::default()
        };
        let mut results = Vec::with_capacity(ids.len());

        for (id, hit) in ids.iter().copied().zip(cached) {
            if let Some(record) = hit {
                meta.cache_hits += 1;
                results.push(BatchItem::Found {
                    id,
                    source: CacheSource::Cache,
                    data: record,
                });
                continue;
            }

            // Misses were spawned in request order, so they come back in it.
            let outcome = match fetched.next() {
                Some((fetched_id, outcome)) if fetched_id == id => outcome,
                _ => Err(ServerError::internal("batch bookkeeping mismatch")),
            };

            match outcome {
                Ok(record) => {
                    meta.live_fetches += 1;
                    results.push(BatchItem::Found {
                        id,
                        source: CacheSource::Live,
                        data: record,
                    });
                }
                Err(e) => {
                    warn!(kind = %kind, id, error = %e, "Batch item failed");
                    meta.errors += 1;
                    results.push(BatchItem::Failed {
                        id,
                        error: ErrorDescriptor::from_error(id, &e),
                    });
                }
            }
        }

        meta.elapsed_ms = start.elapsed().as_millis() as u64;
        Ok(BatchResult {
            model: kind,
            results,
            meta,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::new_shared_caches;
    use crate::gateway::RequestOptions;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Serves `{"id": n}` for every card path except id 2, which is missing.
    struct StubGateway {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ApiGateway for StubGateway {
        async fn request(&self, path: &str, _options: RequestOptions) -> Result<Value, ServerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let id: u64 = path
                .rsplit('/')
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| ServerError::upstream(400, "bad path"))?;
            match id {
                2 => Err(ServerError::upstream(404, "Not found.")),
                99 => Ok(json!({"name": "no id"})),
                _ => Ok(json!({"id": id, "name": format!("Card {id}")})),
            }
        }
    }

    fn retriever() -> (BatchRetriever, Arc<StubGateway>) {
        let gateway = Arc::new(StubGateway {
            calls: AtomicUsize::new(0),
        });
        let caches = new_shared_caches(Duration::from_secs(60));
        (BatchRetriever::new(gateway.clone(), caches, 4), gateway)
    }

    #[test]
    fn test_validate_ids() {
        assert_eq!(validate_ids(&[3, 1, 3, 2, 1]).unwrap(), vec![3, 1, 2]);
        assert!(validate_ids(&[]).is_err());
        assert!(validate_ids(&[1, 0]).is_err());
        assert!(validate_ids(&[-4]).is_err());
        let too_many: Vec<i64> = (1..=51).collect();
        assert!(validate_ids(&too_many).is_err());
        let max: Vec<i64> = (1..=50).collect();
        assert_eq!(validate_ids(&max).unwrap().len(), 50);
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let (retriever, _) = retriever();
        let result = retriever
            .retrieve(ResourceKind::Cards, &[1, 2, 3])
            .await
            .unwrap();

        let ids: Vec<u64> = result.results.iter().map(BatchItem::id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(result.results[0].record().is_some());
        let error = result.results[1].error().unwrap();
        assert_eq!(error.status, Some(404));
        assert!(error.agent_guidance.contains("card 2"));
        assert!(result.results[2].record().is_some());
        assert_eq!(result.meta.errors, 1);
        assert_eq!(result.meta.live_fetches, 2);
    }

    #[tokio::test]
    async fn test_shape_error_is_isolated() {
        let (retriever, _) = retriever();
        let result = retriever
            .retrieve(ResourceKind::Cards, &[99, 1])
            .await
            .unwrap();
        assert_eq!(result.results[0].error().unwrap().code, "UNEXPECTED_RESPONSE");
        assert!(result.results[1].record().is_some());
    }

    #[tokio::test]
    async fn test_second_call_is_served_from_cache() {
        let (retriever, gateway) = retriever();
        let first = retriever.retrieve(ResourceKind::Cards, &[5, 6]).await.unwrap();
        let second = retriever.retrieve(ResourceKind::Cards, &[6, 5]).await.unwrap();

        assert_eq!(gateway.calls.load(Ordering::SeqCst), 2);
        assert_eq!(first.meta.live_fetches, 2);
        assert_eq!(second.meta.cache_hits, 2);
        assert!(second
            .results
            .iter()
            .all(|r| r.source() == Some(CacheSource::Cache)));
        assert_eq!(first.results[0].record(), second.results[1].record());
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let (retriever, gateway) = retriever();
        retriever.retrieve(ResourceKind::Cards, &[2]).await.unwrap();
        retriever.retrieve(ResourceKind::Cards, &[2]).await.unwrap();
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_validation_failure_makes_no_calls() {
        let (retriever, gateway) = retriever();
        let err = retriever.retrieve(ResourceKind::Cards, &[1, -1]).await.unwrap_err();
        assert!(matches!(err, ServerError::Validation { .. }));
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_batch_item_serialization() {
        let failed = BatchItem::Failed {
            id: 2,
            error: ErrorDescriptor::from_error(2, &ServerError::upstream(404, "Not found.")),
        };
        let value = serde_json::to_value(&failed).unwrap();
        assert_eq!(value["id"], 2);
        assert_eq!(value["error"]["status"], 404);
        assert_eq!(value["error"]["code"], "RESOURCE_NOT_FOUND");
    }
}
