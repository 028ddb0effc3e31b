//! Tool input types with JSON Schema generation.

use mcpkit::ToolInput;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Input for the `list` tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToolInput)]
pub struct ListInput {
    /// Resource kind to list.
    #[schemars(description = "Resource kind: 'cards', 'dashboards', 'tables', 'databases' or 'collections'")]
    pub model: String,

    /// Number of items to skip.
    #[serde(default)]
    #[schemars(description = "Number of items to skip (default: 0)")]
    pub offset: Option<usize>,

    /// Page size.
    #[serde(default)]
    #[schemars(description = "Maximum items to return, 1-1000 (default: 100)")]
    pub limit: Option<usize>,
}

/// Input for the `retrieve` tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToolInput)]
pub struct RetrieveInput {
    #[schemars(description = "Resource kind: 'cards', 'dashboards', 'tables', 'databases', 'collections' or 'fields'")]
    pub model: String,

    #[schemars(description = "Ids to fetch, 1-50 positive integers; duplicates are ignored")]
    pub ids: Vec<i64>,

    #[serde(default)]
    #[schemars(description = "Databases only: index of the first table to return (default: 0)")]
    pub table_offset: Option<usize>,

    #[serde(default)]
    #[schemars(description = "Databases only: maximum tables to return, 1-1000 (default: 100)")]
    pub table_limit: Option<usize>,
}

/// Input for the `execute` tool.
///
/// Exactly one of `database_id` + `query`, or `card_id`, must be given.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToolInput)]
pub struct ExecuteInput {
    #[serde(default)]
    #[schemars(description = "Database to run `query` against")]
    pub database_id: Option<i64>,

    #[serde(default)]
    #[schemars(description = "Native SQL query. A LIMIT is added or lowered to respect row_limit")]
    pub query: Option<String>,

    #[serde(default)]
    #[schemars(description = "Saved question (card) to run instead of a native query")]
    pub card_id: Option<i64>,

    #[serde(default)]
    #[schemars(description = "Maximum rows to return, 1-2000 (default: 500)")]
    pub row_limit: Option<usize>,
}

/// Input for the `export` tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToolInput)]
pub struct ExportInput {
    #[serde(default)]
    #[schemars(description = "Database to run `query` against")]
    pub database_id: Option<i64>,

    #[serde(default)]
    #[schemars(description = "Native SQL query to export")]
    pub query: Option<String>,

    #[serde(default)]
    #[schemars(description = "Saved question (card) to export instead of a native query")]
    pub card_id: Option<i64>,

    #[serde(default = "default_export_format")]
    #[schemars(description = "Output format: 'csv' or 'json' (default: csv). 'xlsx' is not supported")]
    pub format: String,

    #[serde(default)]
    #[schemars(description = "Maximum rows to export, 1-1000000 (default: 10000)")]
    pub row_limit: Option<usize>,
}

fn default_export_format() -> String {
    "csv".to_string()
}

/// Input for the `clear_cache` tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToolInput)]
pub struct ClearCacheInput {
    #[serde(default = "default_cache_type")]
    #[schemars(description = "What to clear: 'all' (default), 'all-lists', 'all-individual', a kind such as 'cards', or a kind's list cache such as 'cards-list'")]
    pub cache_type: String,
}

fn default_cache_type() -> String {
    "all".to_string()
}

/// Input for the `search` tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToolInput)]
pub struct SearchInput {
    #[schemars(description = "Search text, matched against names and descriptions")]
    pub query: String,

    #[serde(default)]
    #[schemars(description = "Restrict to kinds: 'cards', 'dashboards', 'tables', 'databases', 'collections'")]
    pub models: Option<Vec<String>>,

    #[serde(default)]
    #[schemars(description = "Maximum hits to return, 1-200 (default: 50)")]
    pub limit: Option<usize>,
}
