//! MCP tools for Metabase access.
//!
//! - `list`: Paged summaries of one resource kind
//! - `retrieve`: Batch fetch of up to 50 resources by id
//! - `execute`: Run native SQL or a saved card
//! - `export`: Run a query and return CSV or JSON inline
//! - `search`: Full-text search across kinds
//! - `clear_cache`: Drop cached entries and report metrics
//!
//! Every failure is returned as a tool error whose text is a JSON error
//! envelope, so agents can read `code`, `agentGuidance` and `recoveryAction`.

mod inputs;

pub use inputs::*;

use crate::constants::LOG_QUERY_TRUNCATE_LENGTH;
use crate::error::ServerError;
use crate::server::MetabaseMcpServer;
use crate::telemetry::RequestContext;
use mcpkit::prelude::*;
use serde_json::Value;
use std::future::Future;
use tracing::{debug, info, info_span, warn, Instrument};

/// MCP server implementation containing all tools.
///
/// The `#[mcp_server]` macro generates the MCP protocol infrastructure
/// for all `#[tool]` annotated methods.
#[mcp_server(
    name = "metabase-mcp-server",
    version = "0.1.0",
    instructions = "Metabase analytics access sized for agent context windows. Start with `search` or `list` to find ids, then `retrieve` up to 50 at once. Use `execute` for native SQL or saved cards and `export` for larger result sets. Write statements are blocked while read-only mode is on (the default). Resources and list pages are cached for 10 minutes by default; call `clear_cache` to force fresh data."
)]
impl MetabaseMcpServer {
    /// List one page of a resource kind.
    #[tool(description = "List cards, dashboards, tables, databases or collections as compact summaries. Paged with offset/limit (default 100, max 1000). Fields are reached through retrieve(model=\"tables\").")]
    pub async fn list(&self, input: ListInput) -> Result<ToolOutput, McpError> {
        debug!(model = %input.model, offset = ?input.offset, limit = ?input.limit, "list");
        Ok(self.run("list", self.list_resources(input)).await)
    }

    /// Fetch up to 50 resources of one kind.
    ///
    /// Results come back in request order; one failing id does not fail the
    /// batch.
    #[tool(description = "Retrieve 1-50 cards, dashboards, tables, databases, collections or fields by id, with noisy metadata removed. Cached results are reused. Per-id failures are reported inline. Databases accept table_offset/table_limit to page their table list.")]
    pub async fn retrieve(&self, input: RetrieveInput) -> Result<ToolOutput, McpError> {
        debug!(model = %input.model, ids = input.ids.len(), "retrieve");
        Ok(self.run("retrieve", self.retrieve_resources(input)).await)
    }

    /// Run native SQL or a saved card.
    #[tool(description = "Execute a native SQL query (database_id + query) or a saved card (card_id). Returns at most row_limit rows (default 500, max 2000); a LIMIT is added or lowered in native SQL. Write statements are rejected in read-only mode.")]
    pub async fn execute(&self, input: ExecuteInput) -> Result<ToolOutput, McpError> {
        if let Some(query) = &input.query {
            debug!(
                "Executing query: {}",
                truncate_for_log(query, LOG_QUERY_TRUNCATE_LENGTH)
            );
        }
        Ok(self.run("execute", self.execute_query(input)).await)
    }

    /// Run a query and return its rows as CSV or JSON.
    #[tool(description = "Export the results of native SQL (database_id + query) or a saved card (card_id) as CSV or JSON records, returned inline. row_limit defaults to 10000, max 1000000.")]
    pub async fn export(&self, input: ExportInput) -> Result<ToolOutput, McpError> {
        if let Some(query) = &input.query {
            debug!(
                format = %input.format,
                "Exporting query: {}",
                truncate_for_log(query, LOG_QUERY_TRUNCATE_LENGTH)
            );
        }
        Ok(self.run("export", self.export_query(input)).await)
    }

    /// Full-text search.
    #[tool(description = "Search Metabase by name and description. Optionally restrict to models such as ['cards', 'dashboards']. Returns compact hits with ids to pass to retrieve.")]
    pub async fn search(&self, input: SearchInput) -> Result<ToolOutput, McpError> {
        debug!(query = %input.query, "search");
        Ok(self.run("search", self.search_resources(input)).await)
    }

    /// Clear cached entries and report server metrics.
    #[tool(description = "Clear cached resources. cache_type: 'all' (default), 'all-lists', 'all-individual', a kind such as 'cards', or a kind's list pages such as 'cards-list'. Also returns cache and request metrics.")]
    pub async fn clear_cache(&self, input: ClearCacheInput) -> Result<ToolOutput, McpError> {
        let result = self.clear_caches(input);
        Ok(self.run("clear_cache", async move { result }).await)
    }
}

impl MetabaseMcpServer {
    /// Run one tool operation with a correlation id and map its outcome.
    async fn run<F>(&self, operation: &str, fut: F) -> ToolOutput
    where
        F: Future<Output = Result<Value, ServerError>>,
    {
        let ctx = RequestContext::new(operation);
        let span = info_span!(
            "tool",
            operation = %ctx.operation,
            correlation_id = %ctx.correlation_id
        );
        let result = fut.instrument(span).await;

        match result {
            Ok(value) => {
                self.metrics.record_tool_call(true);
                info!(
                    operation = %ctx.operation,
                    correlation_id = %ctx.correlation_id,
                    elapsed_ms = ctx.elapsed_ms(),
                    "Tool call succeeded"
                );
                match serde_json::to_string_pretty(&value) {
                    Ok(text) => ToolOutput::text(text),
                    Err(e) => {
                        warn!("Failed to serialize tool output: {}", e);
                        ToolOutput::error(
                            ServerError::internal(format!("failed to serialize output: {e}"))
                                .to_envelope()
                                .to_json(),
                        )
                    }
                }
            }
            Err(e) => {
                self.metrics.record_tool_call(false);
                match &e {
                    ServerError::WriteBlocked { .. } => self.metrics.record_write_blocked(),
                    ServerError::Upstream { .. }
                    | ServerError::Connection { .. }
                    | ServerError::Timeout { .. } => self.metrics.record_upstream_error(),
                    _ => {}
                }
                warn!(
                    operation = %ctx.operation,
                    correlation_id = %ctx.correlation_id,
                    elapsed_ms = ctx.elapsed_ms(),
                    code = e.code(),
                    "Tool call failed: {}",
                    e
                );
                ToolOutput::error(e.to_envelope().to_json())
            }
        }
    }
}

/// Collapse whitespace and truncate a query for logging.
pub(crate) fn truncate_for_log(s: &str, max_len: usize) -> String {
    let flat = s.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_len {
        return flat;
    }
    let head: String = flat.chars().take(max_len).collect();
    format!("{head}...")
}
