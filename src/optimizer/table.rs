//! Table reduction. Keeps the field list, each field reduced.

use super::decode;
use super::field::{OptimizedField, RawField};
use crate::error::ServerError;
use crate::resource::ResourceKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizedTable {
    pub id: u64,
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub schema: Option<String>,
    pub db_id: Option<u64>,
    pub entity_type: Option<String>,
    pub estimated_row_count: Option<u64>,
    pub view_count: Option<u64>,
    pub fields: Vec<OptimizedField>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTable {
    id: u64,
    name: Option<String>,
    display_name: Option<String>,
    description: Option<String>,
    schema: Option<String>,
    db_id: Option<u64>,
    entity_type: Option<String>,
    estimated_row_count: Option<u64>,
    view_count: Option<u64>,
    fields: Option<Vec<RawField>>,
    created_at: Option<String>,
    updated_at: Option<String>,
}

pub(super) fn optimize(raw: Value) -> Result<OptimizedTable, ServerError> {
    let raw: RawTable = decode(ResourceKind::Tables, raw)?;
    Ok(OptimizedTable {
        id: raw.id,
        name: raw.name,
        display_name: raw.display_name,
        description: raw.description,
        schema: raw.schema,
        db_id: raw.db_id,
        entity_type: raw.entity_type,
        estimated_row_count: raw.estimated_row_count,
        view_count: raw.view_count,
        fields: raw
            .fields
            .unwrap_or_default()
            .into_iter()
            .map(OptimizedField::from)
            .collect(),
        created_at: raw.created_at,
        updated_at: raw.updated_at,
    })
}
