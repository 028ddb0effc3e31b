//! Field reduction. Fingerprints, binning options and dimension metadata are dropped.

use super::decode;
use crate::error::ServerError;
use crate::resource::ResourceKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizedField {
    pub id: u64,
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub base_type: Option<String>,
    pub effective_type: Option<String>,
    pub semantic_type: Option<String>,
    pub database_type: Option<String>,
    pub table_id: Option<u64>,
    pub position: Option<i64>,
    pub database_required: Option<bool>,
    pub fk_target_field_id: Option<u64>,
    pub visibility_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct RawField {
    id: u64,
    name: Option<String>,
    display_name: Option<String>,
    description: Option<String>,
    base_type: Option<String>,
    effective_type: Option<String>,
    semantic_type: Option<String>,
    database_type: Option<String>,
    table_id: Option<u64>,
    position: Option<i64>,
    database_required: Option<bool>,
    fk_target_field_id: Option<u64>,
    visibility_type: Option<String>,
}

impl From<RawField> for OptimizedField {
    fn from(raw: RawField) -> Self {
        Self {
            id: raw.id,
            name: raw.name,
            display_name: raw.display_name,
            description: raw.description,
            base_type: raw.base_type,
            effective_type: raw.effective_type,
            semantic_type: raw.semantic_type,
            database_type: raw.database_type,
            table_id: raw.table_id,
            position: raw.position,
            database_required: raw.database_required,
            fk_target_field_id: raw.fk_target_field_id,
            visibility_type: raw.visibility_type,
        }
    }
}

pub(super) fn optimize(raw: Value) -> Result<OptimizedField, ServerError> {
    let raw: RawField = decode(ResourceKind::Fields, raw)?;
    Ok(raw.into())
}
