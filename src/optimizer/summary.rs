//! Compact per-kind summaries used by `list`.

use crate::error::ServerError;
use crate::resource::ResourceKind;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardSummary {
    pub id: u64,
    pub name: Option<String>,
    pub description: Option<String>,
    pub collection_id: Option<u64>,
    pub database_id: Option<u64>,
    pub display: Option<String>,
    pub view_count: Option<u64>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSummary {
    pub id: u64,
    pub name: Option<String>,
    pub description: Option<String>,
    pub collection_id: Option<u64>,
    pub view_count: Option<u64>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableListSummary {
    pub id: u64,
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub schema: Option<String>,
    pub db_id: Option<u64>,
    pub entity_type: Option<String>,
    pub estimated_row_count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSummary {
    pub id: u64,
    pub name: Option<String>,
    pub engine: Option<String>,
    pub is_sample: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSummary {
    pub id: u64,
    pub name: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub personal_owner_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ListItem {
    Card(CardSummary),
    Dashboard(DashboardSummary),
    Table(TableListSummary),
    Database(DatabaseSummary),
    Collection(CollectionSummary),
}

/// One page of summaries, as cached and returned by `list`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ListPage {
    pub items: Vec<ListItem>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
    pub has_more: bool,
}

/// Build one page of summaries from a raw list response.
///
/// Accepts a bare array or an object wrapping it in `data`. Archived items
/// and items that do not parse (the synthetic `"root"` collection, for
/// instance) are skipped.
pub fn summarize_list(
    kind: ResourceKind,
    raw: Value,
    offset: usize,
    limit: usize,
) -> Result<ListPage, ServerError> {
    let entries = match raw {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(ServerError::unexpected_payload(
                    kind,
                    "list response object has no 'data' array",
                ))
            }
        },
        _ => {
            return Err(ServerError::unexpected_payload(
                kind,
                "list response is neither an array nor an object",
            ))
        }
    };

    let mut items = Vec::with_capacity(entries.len());
    for entry in entries {
        if entry.get("archived").and_then(Value::as_bool) == Some(true) {
            continue;
        }
        match summarize(kind, entry)? {
            Some(item) => items.push(item),
            None => continue,
        }
    }

    let total = items.len();
    let start = offset.min(total);
    let end = start.saturating_add(limit).min(total);
    let page: Vec<ListItem> = items.drain(start..end).collect();

    Ok(ListPage {
        items: page,
        total,
        offset,
        limit,
        has_more: end < total,
    })
}

fn summarize(kind: ResourceKind, entry: Value) -> Result<Option<ListItem>, ServerError> {
    let item = match kind {
        ResourceKind::Cards => parse_entry(kind, entry).map(ListItem::Card),
        ResourceKind::Dashboards => parse_entry(kind, entry).map(ListItem::Dashboard),
        ResourceKind::Tables => parse_entry(kind, entry).map(ListItem::Table),
        ResourceKind::Databases => parse_entry(kind, entry).map(ListItem::Database),
        ResourceKind::Collections => parse_entry(kind, entry).map(ListItem::Collection),
        ResourceKind::Fields => {
            return Err(ServerError::validation(
                "model",
                "fields cannot be listed",
                "Use retrieve(model=\"tables\", ids=[...]) to get a table's fields",
            ))
        }
    };
    Ok(item)
}

/// One `search` hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub model: Option<String>,
    pub id: u64,
    pub name: Option<String>,
    pub description: Option<String>,
    pub collection_id: Option<u64>,
    pub database_id: Option<u64>,
    pub table_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawSearchHit {
    model: Option<String>,
    id: u64,
    name: Option<String>,
    description: Option<String>,
    collection_id: Option<u64>,
    collection: Option<RawCollectionRef>,
    database_id: Option<u64>,
    table_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawCollectionRef {
    id: Option<Value>,
}

/// Reduce a `/api/search` response to at most `limit` hits.
pub fn summarize_search(raw: Value, limit: usize) -> Result<Vec<SearchHit>, ServerError> {
    let entries = match raw {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Array(items)) => items,
            _ => return Err(ServerError::internal("search response has no 'data' array")),
        },
        _ => return Err(ServerError::internal("search response is neither an array nor an object")),
    };

    Ok(entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<RawSearchHit>(entry) {
            Ok(hit) => Some(hit),
            Err(e) => {
                debug!(error = %e, "Skipping search hit that does not parse");
                None
            }
        })
        .take(limit)
        .map(|hit| SearchHit {
            collection_id: hit.collection_id.or_else(|| {
                hit.collection
                    .as_ref()
                    .and_then(|c| c.id.as_ref())
                    .and_then(Value::as_u64)
            }),
            model: hit.model,
            id: hit.id,
            name: hit.name,
            description: hit.description,
            database_id: hit.database_id,
            table_id: hit.table_id,
        })
        .collect())
}

fn parse_entry<T: DeserializeOwned>(kind: ResourceKind, entry: Value) -> Option<T> {
    match serde_json::from_value(entry) {
        Ok(item) => Some(item),
        Err(e) => {
            debug!(kind = %kind, error = %e, "Skipping list entry that does not parse");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::test_support::{keys, sorted};
    use serde_json::json;

    fn cards(count: u64) -> Value {
        Value::Array(
            (1..=count)
                .map(|i| {
                    json!({
                        "id": i,
                        "name": format!("Card {i}"),
                        "display": "table",
                        "archived": false,
                        "result_metadata": [{"fingerprint": {}}]
                    })
                })
                .collect(),
        )
    }

    #[test]
    fn test_card_summary_fields() {
        let page = summarize_list(ResourceKind::Cards, cards(1), 0, 10).unwrap();
        let value = serde_json::to_value(&page.items[0]).unwrap();
        assert_eq!(
            keys(&value),
            sorted(&[
                "id",
                "name",
                "description",
                "collection_id",
                "database_id",
                "display",
                "view_count",
                "updated_at",
            ])
        );
    }

    #[test]
    fn test_list_window_and_has_more() {
        let page = summarize_list(ResourceKind::Cards, cards(25), 10, 10).unwrap();
        assert_eq!(page.items.len(), 10);
        assert_eq!(page.total, 25);
        assert!(page.has_more);

        let last = summarize_list(ResourceKind::Cards, cards(25), 20, 10).unwrap();
        assert_eq!(last.items.len(), 5);
        assert!(!last.has_more);
    }

    #[test]
    fn test_archived_items_are_skipped() {
        let raw = json!([
            {"id": 1, "name": "live"},
            {"id": 2, "name": "gone", "archived": true}
        ]);
        let page = summarize_list(ResourceKind::Dashboards, raw, 0, 10).unwrap();
        assert_eq!(page.total, 1);
    }

    #[test]
    fn test_data_wrapper_is_unwrapped() {
        let raw = json!({"data": [{"id": 1, "name": "Sample", "engine": "h2", "is_sample": true}], "total": 1});
        let page = summarize_list(ResourceKind::Databases, raw, 0, 10).unwrap();
        let value = serde_json::to_value(&page.items[0]).unwrap();
        assert_eq!(keys(&value), sorted(&["id", "name", "engine", "is_sample"]));
    }

    #[test]
    fn test_root_collection_is_skipped() {
        let raw = json!([
            {"id": "root", "name": "Our analytics"},
            {"id": 3, "name": "Finance", "location": "/"}
        ]);
        let page = summarize_list(ResourceKind::Collections, raw, 0, 10).unwrap();
        assert_eq!(page.total, 1);
    }

    #[test]
    fn test_fields_cannot_be_listed() {
        let err = summarize_list(ResourceKind::Fields, json!([{"id": 1}]), 0, 10).unwrap_err();
        assert!(matches!(err, ServerError::Validation { .. }));
    }

    #[test]
    fn test_search_hits_are_reduced() {
        let raw = json!({
            "data": [
                {"model": "card", "id": 12, "name": "Weekly revenue", "collection": {"id": 5, "name": "Finance"},
                 "database_id": 2, "table_id": null, "scores": [{"score": 1.0}], "dashboardcard_count": 3},
                {"model": "collection", "id": "root", "name": "Our analytics"},
                {"model": "table", "id": 14, "name": "ORDERS", "collection": {"id": "root"}, "database_id": 1, "table_id": 14}
            ],
            "total": 3
        });
        let hits = summarize_search(raw, 10).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].collection_id, Some(5));
        assert_eq!(hits[1].collection_id, None);
        let value = serde_json::to_value(&hits[0]).unwrap();
        assert_eq!(
            keys(&value),
            sorted(&["model", "id", "name", "description", "collection_id", "database_id", "table_id"])
        );
    }

    #[test]
    fn test_search_respects_limit() {
        let raw = Value::Array((1..=10).map(|i| json!({"model": "card", "id": i})).collect());
        assert_eq!(summarize_search(raw, 3).unwrap().len(), 3);
    }

    #[test]
    fn test_bad_list_shape_is_rejected() {
        assert!(summarize_list(ResourceKind::Tables, json!("nope"), 0, 10).is_err());
        assert!(summarize_list(ResourceKind::Tables, json!({"rows": []}), 0, 10).is_err());
    }
}
