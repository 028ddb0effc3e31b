//! MCP server struct definition and the operations behind each tool.
//!
//! Operations return plain JSON or a [`ServerError`]; the `tools` module maps
//! them onto the protocol.

use crate::cache::{new_shared_caches, CacheSource, CacheTarget, ListKey, SharedCaches};
use crate::config::Config;
use crate::constants::{
    DEFAULT_EXECUTE_ROW_LIMIT, DEFAULT_EXPORT_ROW_LIMIT, DEFAULT_LIST_LIMIT, DEFAULT_SEARCH_LIMIT,
    DEFAULT_TABLE_PAGE_LIMIT, MAX_EXECUTE_ROW_LIMIT, MAX_EXPORT_ROW_LIMIT, MAX_LIST_LIMIT,
    MAX_SEARCH_LIMIT, MAX_TABLE_PAGE_LIMIT,
};
use crate::error::{ResourceRef, ServerError};
use crate::gateway::{ApiGateway, MetabaseClient, RequestOptions};
use crate::optimizer::{paginate_tables, summarize_list, summarize_search, OptimizedRecord};
use crate::query::{DatasetResult, ExportFormat, QueryGuard, QueryRewrite};
use crate::resource::ResourceKind;
use crate::retrieval::{BatchItem, BatchRetriever};
use crate::telemetry::{new_shared_metrics, SharedMetrics};
use crate::tools::{
    ClearCacheInput, ExecuteInput, ExportInput, ListInput, RetrieveInput, SearchInput,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

/// The Metabase MCP Server instance.
///
/// Cheap to clone: every component is shared by `Arc`.
#[derive(Clone)]
pub struct MetabaseMcpServer {
    pub(crate) config: Arc<Config>,

    /// Upstream access; `MetabaseClient` in production.
    pub(crate) gateway: Arc<dyn ApiGateway>,

    /// The twelve item and list stores.
    pub(crate) caches: SharedCaches,

    pub(crate) retriever: BatchRetriever,

    pub(crate) guard: QueryGuard,

    pub(crate) metrics: SharedMetrics,
}

/// What an `execute` or `export` call runs.
#[derive(Debug, Clone, PartialEq, Eq)]
enum QuerySource {
    Native { database_id: u64, sql: String },
    Card { card_id: u64 },
}

impl MetabaseMcpServer {
    /// Create a server talking to the configured Metabase instance.
    pub fn new(config: Config) -> Result<Self, ServerError> {
        let client = MetabaseClient::new(&config.metabase, config.retry.clone())?;
        Ok(Self::with_gateway(config, Arc::new(client)))
    }

    /// Create a server over an arbitrary gateway.
    pub fn with_gateway(config: Config, gateway: Arc<dyn ApiGateway>) -> Self {
        let caches = new_shared_caches(config.cache.ttl);
        let retriever = BatchRetriever::new(
            Arc::clone(&gateway),
            Arc::clone(&caches),
            config.query.batch_concurrency,
        );
        let guard = QueryGuard::new(config.query.read_only);

        info!(
            url = %config.metabase.url,
            read_only = config.query.read_only,
            cache_ttl_ms = config.cache.ttl.as_millis() as u64,
            batch_concurrency = config.query.batch_concurrency,
            "Metabase MCP server initialized"
        );

        Self {
            config: Arc::new(config),
            gateway,
            caches,
            retriever,
            guard,
            metrics: new_shared_metrics(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn caches(&self) -> &SharedCaches {
        &self.caches
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    /// `list`: one page of summaries for a kind.
    pub async fn list_resources(&self, input: ListInput) -> Result<Value, ServerError> {
        let kind = parse_model(&input.model)?;
        if !kind.is_listable() {
            return Err(ServerError::validation(
                "model",
                format!("{kind} cannot be listed"),
                "Fields have no list endpoint. Use retrieve(model=\"tables\", ids=[...]) to get \
                 a table's fields.",
            ));
        }

        let offset = input.offset.unwrap_or(0);
        let limit = bounded("limit", input.limit, DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT)?;

        let gateway = Arc::clone(&self.gateway);
        let (page, source) = self
            .caches
            .lists(kind)
            .get_or_fetch(ListKey::new(offset, limit), || async move {
                let path = kind.list_path().unwrap_or_default();
                let raw = gateway
                    .get(path)
                    .await
                    .map_err(|e| e.for_resource(ResourceRef::kind(kind)))?;
                summarize_list(kind, raw, offset, limit)
            })
            .await?;
        self.record_source(source, 1);

        Ok(json!({
            "model": kind,
            "items": page.items,
            "total": page.total,
            "offset": page.offset,
            "limit": page.limit,
            "has_more": page.has_more,
            "source": source,
        }))
    }

    /// `retrieve`: batch fetch of up to 50 ids.
    pub async fn retrieve_resources(&self, input: RetrieveInput) -> Result<Value, ServerError> {
        let kind = parse_model(&input.model)?;

        let table_window = if kind == ResourceKind::Databases {
            let limit = bounded(
                "table_limit",
                input.table_limit,
                DEFAULT_TABLE_PAGE_LIMIT,
                MAX_TABLE_PAGE_LIMIT,
            )?;
            Some((input.table_offset.unwrap_or(0), limit))
        } else {
            None
        };

        let batch = self.retriever.retrieve(kind, &input.ids).await?;
        self.metrics.record_cache_hits(batch.meta.cache_hits as u64);
        self.metrics.record_live_fetches(batch.meta.live_fetches as u64);
        self.metrics.record_batch_item_errors(batch.meta.errors as u64);

        let Some((table_offset, table_limit)) = table_window else {
            return Ok(serde_json::to_value(&batch)?);
        };

        let results = batch
            .results
            .iter()
            .map(|item| match item {
                BatchItem::Found {
                    id,
                    source,
                    data: OptimizedRecord::Database(db),
                } => Ok(json!({
                    "id": id,
                    "source": source,
                    "data": paginate_tables(db, table_offset, table_limit),
                })),
                other => serde_json::to_value(other),
            })
            .collect::<Result<Vec<Value>, _>>()?;

        Ok(json!({
            "model": batch.model,
            "results": results,
            "meta": batch.meta,
        }))
    }

    /// `execute`: run a native query or saved card.
    pub async fn execute_query(&self, input: ExecuteInput) -> Result<Value, ServerError> {
        let source = query_source(input.database_id, input.query, input.card_id)?;
        let row_limit = bounded(
            "row_limit",
            input.row_limit,
            DEFAULT_EXECUTE_ROW_LIMIT,
            MAX_EXECUTE_ROW_LIMIT,
        )?;

        let (result, rewrite) = self.run_dataset(&source, row_limit, false).await?;

        let mut output = json!({
            "columns": result.columns,
            "rows": result.rows,
            "row_count": result.row_count,
            "truncated": result.truncated,
        });
        if let Some(rewrite) = rewrite {
            output["query_rewrite"] = serde_json::to_value(rewrite)?;
        }
        Ok(output)
    }

    /// `export`: run a query and return the rows inline as CSV or JSON.
    pub async fn export_query(&self, input: ExportInput) -> Result<Value, ServerError> {
        let format: ExportFormat = input.format.parse().map_err(|e: String| {
            ServerError::validation("format", e, "Use format=\"csv\" or format=\"json\".")
        })?;
        if format == ExportFormat::Xlsx {
            return Err(ServerError::validation(
                "format",
                "xlsx export is not supported",
                "Use format=\"csv\"; spreadsheet tools open CSV directly.",
            ));
        }

        let source = query_source(input.database_id, input.query, input.card_id)?;
        let row_limit = bounded(
            "row_limit",
            input.row_limit,
            DEFAULT_EXPORT_ROW_LIMIT,
            MAX_EXPORT_ROW_LIMIT,
        )?;

        let (result, rewrite) = self.run_dataset(&source, row_limit, true).await?;

        let content = match format {
            ExportFormat::Json => result.to_records(),
            _ => Value::String(result.to_csv()),
        };

        let mut output = json!({
            "format": format,
            "columns": result.column_names(),
            "row_count": result.row_count,
            "truncated": result.truncated,
            "content": content,
        });
        if let Some(rewrite) = rewrite {
            output["query_rewrite"] = serde_json::to_value(rewrite)?;
        }
        Ok(output)
    }

    /// `search`: uncached full-text search across kinds.
    pub async fn search_resources(&self, input: SearchInput) -> Result<Value, ServerError> {
        let query = input.query.trim();
        if query.is_empty() {
            return Err(ServerError::validation(
                "query",
                "search text must not be empty",
                "Pass a word or phrase from the resource's name or description.",
            ));
        }
        let limit = bounded("limit", input.limit, DEFAULT_SEARCH_LIMIT, MAX_SEARCH_LIMIT)?;

        let mut options = RequestOptions::get()
            .with_query("q", query)
            .with_query("limit", limit.to_string());
        for model in input.models.unwrap_or_default() {
            for name in search_models(parse_model(&model)?)? {
                options = options.with_query("models", *name);
            }
        }

        let raw = self.gateway.request("/api/search", options).await?;
        self.metrics.record_live_fetches(1);
        let hits = summarize_search(raw, limit)?;

        Ok(json!({
            "query": query,
            "count": hits.len(),
            "limit": limit,
            "results": hits,
        }))
    }

    /// `clear_cache`: drop entries from the selected stores.
    pub fn clear_caches(&self, input: ClearCacheInput) -> Result<Value, ServerError> {
        let target: CacheTarget = input.cache_type.parse().map_err(|e| {
            ServerError::validation(
                "cache_type",
                format!("{e}"),
                "Use 'all', 'all-lists', 'all-individual', a kind such as 'cards', or \
                 'cards-list' for that kind's list pages.",
            )
        })?;

        let report = self.caches.clear(target);
        self.metrics.record_cache_clear();
        let metrics = self.metrics.snapshot();

        Ok(json!({
            "cleared": report,
            "cache_ttl_ms": self.caches.ttl().as_millis() as u64,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "metrics": {
                "counters": metrics,
                "cache_hit_rate": metrics.cache_hit_rate(),
                "success_rate": metrics.success_rate(),
            },
        }))
    }

    async fn run_dataset(
        &self,
        source: &QuerySource,
        row_limit: usize,
        export: bool,
    ) -> Result<(DatasetResult, Option<QueryRewrite>), ServerError> {
        // Without constraints Metabase caps unaggregated rows at 2000.
        let constraints = export.then(|| {
            json!({
                "max-results": row_limit,
                "max-results-bare-rows": row_limit,
            })
        });

        let (raw, rewrite) = match source {
            QuerySource::Native { database_id, sql } => {
                let rewrite = self.guard.prepare(sql, row_limit)?;
                let mut body = json!({
                    "database": database_id,
                    "type": "native",
                    "native": { "query": rewrite.rewritten_query, "template-tags": {} },
                    "parameters": [],
                });
                if let Some(constraints) = constraints {
                    body["constraints"] = constraints;
                }
                let raw = self
                    .gateway
                    .request("/api/dataset", RequestOptions::post(body))
                    .await
                    .map_err(|e| {
                        e.for_resource(ResourceRef::item(ResourceKind::Databases, *database_id))
                    })?;
                (raw, Some(rewrite))
            }
            QuerySource::Card { card_id } => {
                let path = format!("/api/card/{card_id}/query");
                let mut body = json!({ "parameters": [] });
                if let Some(constraints) = constraints {
                    body["constraints"] = constraints;
                }
                let raw = self
                    .gateway
                    .request(&path, RequestOptions::post(body))
                    .await
                    .map_err(|e| {
                        e.for_resource(ResourceRef::item(ResourceKind::Cards, *card_id))
                    })?;
                (raw, None)
            }
        };

        self.metrics.record_query();
        let result = DatasetResult::from_response(raw, row_limit)?;
        debug!(
            rows = result.row_count,
            truncated = result.truncated,
            "Dataset returned"
        );
        Ok((result, rewrite))
    }

    fn record_source(&self, source: CacheSource, n: u64) {
        match source {
            CacheSource::Cache => self.metrics.record_cache_hits(n),
            CacheSource::Live => self.metrics.record_live_fetches(n),
        }
    }
}

fn parse_model(model: &str) -> Result<ResourceKind, ServerError> {
    model.parse().map_err(|e| {
        ServerError::validation(
            "model",
            format!("{e}"),
            "Use one of the plural kind names, e.g. model=\"cards\".",
        )
    })
}

/// Resolve an optional limit against its default and `1..=max`.
fn bounded(
    field: &str,
    value: Option<usize>,
    default: usize,
    max: usize,
) -> Result<usize, ServerError> {
    let value = value.unwrap_or(default);
    if value == 0 || value > max {
        return Err(ServerError::validation(
            field,
            format!("must be between 1 and {max}, got {value}"),
            format!("Pass {field} between 1 and {max}, or omit it to use {default}."),
        ));
    }
    Ok(value)
}

fn query_source(
    database_id: Option<i64>,
    query: Option<String>,
    card_id: Option<i64>,
) -> Result<QuerySource, ServerError> {
    const GUIDANCE: &str = "Pass either database_id together with query (native SQL), or card_id \
                            alone (saved question). Use `list` model=\"databases\" or \
                            model=\"cards\" to find ids.";

    let positive = |field: &str, id: i64| -> Result<u64, ServerError> {
        if id > 0 {
            Ok(id as u64)
        } else {
            Err(ServerError::validation(
                field,
                format!("must be a positive integer, got {id}"),
                GUIDANCE,
            ))
        }
    };

    match (database_id, query, card_id) {
        (Some(db), Some(sql), None) => Ok(QuerySource::Native {
            database_id: positive("database_id", db)?,
            sql,
        }),
        (None, None, Some(card)) => Ok(QuerySource::Card {
            card_id: positive("card_id", card)?,
        }),
        (None, Some(_), None) => Err(ServerError::validation(
            "database_id",
            "database_id is required with query",
            GUIDANCE,
        )),
        (Some(_), None, None) => Err(ServerError::validation(
            "query",
            "query is required with database_id",
            GUIDANCE,
        )),
        (None, None, None) => Err(ServerError::validation(
            "query",
            "nothing to run",
            GUIDANCE,
        )),
        _ => Err(ServerError::validation(
            "card_id",
            "card_id cannot be combined with database_id or query",
            GUIDANCE,
        )),
    }
}

/// Metabase search model names for a kind.
fn search_models(kind: ResourceKind) -> Result<&'static [&'static str], ServerError> {
    match kind {
        ResourceKind::Cards => Ok(&["card", "dataset", "metric"]),
        ResourceKind::Dashboards => Ok(&["dashboard"]),
        ResourceKind::Tables => Ok(&["table"]),
        ResourceKind::Databases => Ok(&["database"]),
        ResourceKind::Collections => Ok(&["collection"]),
        ResourceKind::Fields => Err(ServerError::validation(
            "models",
            "fields are not searchable",
            "Search for the table instead, then retrieve(model=\"tables\") to see its fields.",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded() {
        assert_eq!(bounded("limit", None, 100, 1000).unwrap(), 100);
        assert_eq!(bounded("limit", Some(1000), 100, 1000).unwrap(), 1000);
        assert!(bounded("limit", Some(0), 100, 1000).is_err());
        assert!(bounded("limit", Some(1001), 100, 1000).is_err());
    }

    #[test]
    fn test_query_source_selection() {
        assert_eq!(
            query_source(Some(1), Some("SELECT 1".into()), None).unwrap(),
            QuerySource::Native {
                database_id: 1,
                sql: "SELECT 1".into()
            }
        );
        assert_eq!(
            query_source(None, None, Some(7)).unwrap(),
            QuerySource::Card { card_id: 7 }
        );
        assert!(query_source(Some(1), Some("SELECT 1".into()), Some(7)).is_err());
        assert!(query_source(None, Some("SELECT 1".into()), None).is_err());
        assert!(query_source(Some(1), None, None).is_err());
        assert!(query_source(None, None, None).is_err());
        assert!(query_source(None, None, Some(0)).is_err());
        assert!(query_source(Some(1), None, Some(2)).is_err());
    }

    #[test]
    fn test_search_models() {
        assert_eq!(
            search_models(ResourceKind::Cards).unwrap(),
            &["card", "dataset", "metric"]
        );
        assert!(search_models(ResourceKind::Fields).is_err());
    }

    #[test]
    fn test_parse_model_error_is_validation() {
        let err = parse_model("widgets").unwrap_err();
        assert!(matches!(err, ServerError::Validation { .. }));
        assert!(err.to_string().contains("widgets"));
    }
}
