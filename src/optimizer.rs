//! Response optimization for Metabase payloads.
//!
//! Metabase responses carry large amounts of metadata an agent never needs
//! (field fingerprints, binning options, capability lists, render settings).
//! Each resource kind has a reducer that deserializes the raw payload into a
//! typed struct at a single boundary and projects it onto a fixed field set.
//! Absent source fields become `null`, never a missing key, so every record
//! of a kind has exactly the same shape.

mod card;
mod collection;
mod dashboard;
mod database;
mod field;
mod summary;
mod table;

pub use card::{DatasetQuery, NativeQuery, OptimizedCard, Parameter};
pub use collection::{Ancestor, OptimizedCollection};
pub use dashboard::{DashcardPosition, DashcardSize, OptimizedDashboard, OptimizedDashcard};
pub use database::{
    paginate_tables, DbmsVersion, OptimizedDatabase, PaginatedDatabase, TablePagination,
    TableSummary,
};
pub use field::OptimizedField;
pub use summary::{
    summarize_list, summarize_search, CardSummary, CollectionSummary, DashboardSummary,
    DatabaseSummary, ListItem, ListPage, SearchHit, TableListSummary,
};
pub use table::OptimizedTable;

use crate::error::ServerError;
use crate::resource::ResourceKind;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// A reduced record for one resource kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OptimizedRecord {
    Card(OptimizedCard),
    Dashboard(OptimizedDashboard),
    Table(OptimizedTable),
    Database(OptimizedDatabase),
    Collection(OptimizedCollection),
    Field(OptimizedField),
}

impl OptimizedRecord {
    /// Kind of this record.
    pub fn kind(&self) -> ResourceKind {
        match self {
            OptimizedRecord::Card(_) => ResourceKind::Cards,
            OptimizedRecord::Dashboard(_) => ResourceKind::Dashboards,
            OptimizedRecord::Table(_) => ResourceKind::Tables,
            OptimizedRecord::Database(_) => ResourceKind::Databases,
            OptimizedRecord::Collection(_) => ResourceKind::Collections,
            OptimizedRecord::Field(_) => ResourceKind::Fields,
        }
    }

    /// Id of the underlying resource.
    pub fn id(&self) -> u64 {
        match self {
            OptimizedRecord::Card(r) => r.id,
            OptimizedRecord::Dashboard(r) => r.id,
            OptimizedRecord::Table(r) => r.id,
            OptimizedRecord::Database(r) => r.id,
            OptimizedRecord::Collection(r) => r.id,
            OptimizedRecord::Field(r) => r.id,
        }
    }
}

/// Reduce a raw payload of the given kind.
pub fn optimize(kind: ResourceKind, raw: Value) -> Result<OptimizedRecord, ServerError> {
    Ok(match kind {
        ResourceKind::Cards => OptimizedRecord::Card(card::optimize(raw)?),
        ResourceKind::Dashboards => OptimizedRecord::Dashboard(dashboard::optimize(raw)?),
        ResourceKind::Tables => OptimizedRecord::Table(table::optimize(raw)?),
        ResourceKind::Databases => OptimizedRecord::Database(database::optimize(raw)?),
        ResourceKind::Collections => OptimizedRecord::Collection(collection::optimize(raw)?),
        ResourceKind::Fields => OptimizedRecord::Field(field::optimize(raw)?),
    })
}

/// Deserialize a raw payload into its typed form.
///
/// This is the only place raw Metabase JSON is interpreted. A payload that is
/// not an object, or whose `id` is missing or not a positive integer, is
/// rejected.
pub(crate) fn decode<T: DeserializeOwned>(kind: ResourceKind, raw: Value) -> Result<T, ServerError> {
    let Some(object) = raw.as_object() else {
        return Err(ServerError::unexpected_payload(
            kind,
            format!("expected a JSON object, got {}", json_type_name(&raw)),
        ));
    };

    match object.get("id").and_then(Value::as_u64) {
        Some(id) if id > 0 => {}
        _ => {
            return Err(ServerError::unexpected_payload(
                kind,
                "missing or non-positive integer 'id'",
            ))
        }
    }

    serde_json::from_value(raw).map_err(|e| ServerError::unexpected_payload(kind, e.to_string()))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_rejects_non_objects() {
        let err = optimize(ResourceKind::Cards, json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, ServerError::UnexpectedPayload { .. }));
        assert!(err.to_string().contains("array"));
    }

    #[test]
    fn test_decode_rejects_missing_or_zero_id() {
        assert!(optimize(ResourceKind::Fields, json!({"name": "x"})).is_err());
        assert!(optimize(ResourceKind::Fields, json!({"id": 0})).is_err());
        assert!(optimize(ResourceKind::Fields, json!({"id": "12"})).is_err());
    }

    #[test]
    fn test_record_kind_and_id() {
        let record = optimize(ResourceKind::Collections, json!({"id": 9, "name": "Ops"})).unwrap();
        assert_eq!(record.kind(), ResourceKind::Collections);
        assert_eq!(record.id(), 9);
    }

    #[test]
    fn test_optimize_is_deterministic() {
        let raw = json!({
            "id": 4,
            "name": "Revenue",
            "dataset_query": {"type": "native", "database": 1, "native": {"query": "SELECT 1"}},
            "result_metadata": [{"name": "x", "fingerprint": {"global": {"distinct-count": 3}}}]
        });
        let a = serde_json::to_string(&optimize(ResourceKind::Cards, raw.clone()).unwrap()).unwrap();
        let b = serde_json::to_string(&optimize(ResourceKind::Cards, raw).unwrap()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_untagged_serialization_has_no_variant_wrapper() {
        let record = optimize(ResourceKind::Fields, json!({"id": 3, "name": "total"})).unwrap();
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["id"], 3);
        assert!(value.get("Field").is_none());
    }
}
