//! Database reduction and table pagination.
//!
//! A database can carry thousands of tables. The cached record always holds
//! the full table list; [`paginate_tables`] builds the window returned to the
//! caller so different pages share one cache entry.

use super::decode;
use crate::error::ServerError;
use crate::resource::ResourceKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizedDatabase {
    pub id: u64,
    pub name: Option<String>,
    pub description: Option<String>,
    pub engine: Option<String>,
    pub timezone: Option<String>,
    pub dbms_version: Option<DbmsVersion>,
    pub is_sample: Option<bool>,
    pub initial_sync_status: Option<String>,
    pub tables: Vec<TableSummary>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbmsVersion {
    pub flavor: Option<String>,
    pub version: Option<String>,
}

/// Table entry inside a database record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSummary {
    pub id: u64,
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub schema: Option<String>,
    pub view_count: Option<u64>,
    pub initial_sync_status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawDatabase {
    id: u64,
    name: Option<String>,
    description: Option<String>,
    engine: Option<String>,
    timezone: Option<String>,
    dbms_version: Option<DbmsVersion>,
    is_sample: Option<bool>,
    initial_sync_status: Option<String>,
    tables: Option<Vec<TableSummary>>,
    created_at: Option<String>,
    updated_at: Option<String>,
}

pub(super) fn optimize(raw: Value) -> Result<OptimizedDatabase, ServerError> {
    let raw: RawDatabase = decode(ResourceKind::Databases, raw)?;
    Ok(OptimizedDatabase {
        id: raw.id,
        name: raw.name,
        description: raw.description,
        engine: raw.engine,
        timezone: raw.timezone,
        dbms_version: raw.dbms_version,
        is_sample: raw.is_sample,
        initial_sync_status: raw.initial_sync_status,
        tables: raw.tables.unwrap_or_default(),
        created_at: raw.created_at,
        updated_at: raw.updated_at,
    })
}

/// Window metadata for a paginated table list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TablePagination {
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
    pub returned: usize,
    pub has_more: bool,
}

/// A database record with only one page of its tables.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaginatedDatabase {
    #[serde(flatten)]
    pub database: OptimizedDatabase,
    pub tables_pagination: TablePagination,
}

/// Slice a database's tables to `[offset, offset + limit)`.
///
/// An offset past the end yields an empty page rather than an error.
pub fn paginate_tables(
    database: &OptimizedDatabase,
    offset: usize,
    limit: usize,
) -> PaginatedDatabase {
    let total = database.tables.len();
    let start = offset.min(total);
    let end = start.saturating_add(limit).min(total);

    let mut page = database.clone();
    page.tables = database.tables[start..end].to_vec();

    PaginatedDatabase {
        tables_pagination: TablePagination {
            total,
            offset,
            limit,
            returned: end - start,
            has_more: end < total,
        },
        database: page,
    }
}
