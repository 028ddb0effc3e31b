//! Dashboard reduction.
//!
//! Dashcards keep their layout, parameter wiring and the embedded card. The
//! embedded card goes through the card reducer; virtual cards (text, headings)
//! have no id and are carried as `null`.

use super::card::{self, reduce_parameters, OptimizedCard, Parameter, RawParameter};
use super::decode;
use crate::error::ServerError;
use crate::resource::ResourceKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizedDashboard {
    pub id: u64,
    pub name: Option<String>,
    pub description: Option<String>,
    pub collection_id: Option<u64>,
    pub parameters: Vec<Parameter>,
    pub dashcards: Vec<OptimizedDashcard>,
    pub view_count: Option<u64>,
    pub archived: Option<bool>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizedDashcard {
    pub id: Option<u64>,
    pub card_id: Option<u64>,
    pub position: DashcardPosition,
    pub size: DashcardSize,
    pub parameter_mappings: Option<Value>,
    pub visualization_settings: Option<Value>,
    pub card: Option<OptimizedCard>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DashcardPosition {
    pub row: Option<i64>,
    pub col: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DashcardSize {
    pub size_x: Option<i64>,
    pub size_y: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawDashboard {
    id: u64,
    name: Option<String>,
    description: Option<String>,
    collection_id: Option<u64>,
    parameters: Option<Vec<RawParameter>>,
    #[serde(alias = "ordered_cards")]
    dashcards: Option<Vec<RawDashcard>>,
    view_count: Option<u64>,
    archived: Option<bool>,
    created_at: Option<String>,
    updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawDashcard {
    id: Option<u64>,
    card_id: Option<u64>,
    row: Option<i64>,
    col: Option<i64>,
    size_x: Option<i64>,
    size_y: Option<i64>,
    parameter_mappings: Option<Value>,
    visualization_settings: Option<Value>,
    card: Option<Value>,
}

fn reduce_embedded_card(raw: Option<Value>) -> Option<OptimizedCard> {
    let raw = raw?;
    if raw.get("id").and_then(Value::as_u64).unwrap_or(0) == 0 {
        return None;
    }
    match card::optimize(raw) {
        Ok(card) => Some(card),
        Err(e) => {
            debug!(error = %e, "Dropping malformed embedded card");
            None
        }
    }
}

pub(super) fn optimize(raw: Value) -> Result<OptimizedDashboard, ServerError> {
    let raw: RawDashboard = decode(ResourceKind::Dashboards, raw)?;

    let dashcards = raw
        .dashcards
        .unwrap_or_default()
        .into_iter()
        .map(|dc| OptimizedDashcard {
            id: dc.id,
            card_id: dc.card_id,
            position: DashcardPosition {
                row: dc.row,
                col: dc.col,
            },
            size: DashcardSize {
                size_x: dc.size_x,
                size_y: dc.size_y,
            },
            parameter_mappings: dc.parameter_mappings,
            visualization_settings: dc.visualization_settings,
            card: reduce_embedded_card(dc.card),
        })
        .collect();

    Ok(OptimizedDashboard {
        id: raw.id,
        name: raw.name,
        description: raw.description,
        collection_id: raw.collection_id,
        parameters: reduce_parameters(raw.parameters),
        dashcards,
        view_count: raw.view_count,
        archived: raw.archived,
        created_at: raw.created_at,
        updated_at: raw.updated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::test_support::{keys, sorted};
    use serde_json::json;

    fn raw_dashboard() -> Value {
        json!({
            "id": 30,
            "name": "Sales overview",
            "collection_id": 4,
            "parameters": [{"id": "p1", "name": "Date", "type": "date/all-options", "slug": "date"}],
            "dashcards": [
                {
                    "id": 100,
                    "card_id": 12,
                    "row": 0,
                    "col": 0,
                    "size_x": 12,
                    "size_y": 6,
                    "parameter_mappings": [{"parameter_id": "p1", "card_id": 12}],
                    "visualization_settings": {},
                    "card": {
                        "id": 12,
                        "name": "Weekly revenue",
                        "result_metadata": [{"fingerprint": {}}]
                    },
                    "series": []
                },
                {
                    "id": 101,
                    "card_id": null,
                    "row": 6,
                    "col": 0,
                    "size_x": 24,
                    "size_y": 2,
                    "visualization_settings": {"text": "# Notes", "virtual_card": {"display": "text"}},
                    "card": {"display": "text", "dataset_query": {}}
                }
            ],
            "param_values": {"large": "blob"},
            "view_count": 42
        })
    }

    #[test]
    fn test_dashboard_field_set_is_exact() {
        let dashboard = optimize(raw_dashboard()).unwrap();
        let value = serde_json::to_value(&dashboard).unwrap();
        assert_eq!(
            keys(&value),
            sorted(&[
                "id",
                "name",
                "description",
                "collection_id",
                "parameters",
                "dashcards",
                "view_count",
                "archived",
                "created_at",
                "updated_at",
            ])
        );
        assert_eq!(
            keys(&value["dashcards"][0]),
            sorted(&[
                "id",
                "card_id",
                "position",
                "size",
                "parameter_mappings",
                "visualization_settings",
                "card",
            ])
        );
    }

    #[test]
    fn test_dashcards_embed_reduced_cards() {
        let dashboard = optimize(raw_dashboard()).unwrap();
        let first = &dashboard.dashcards[0];
        assert_eq!(first.position, DashcardPosition { row: Some(0), col: Some(0) });
        assert_eq!(first.size.size_x, Some(12));
        assert_eq!(first.card.as_ref().map(|c| c.id), Some(12));

        let value = serde_json::to_value(first).unwrap();
        assert!(value["card"].get("result_metadata").is_none());
    }

    #[test]
    fn test_virtual_card_is_null() {
        let dashboard = optimize(raw_dashboard()).unwrap();
        let text = &dashboard.dashcards[1];
        assert!(text.card.is_none());
        assert!(text.visualization_settings.is_some());
    }

    #[test]
    fn test_ordered_cards_alias() {
        let dashboard = optimize(json!({
            "id": 5,
            "ordered_cards": [{"id": 1, "card_id": 2, "row": 0, "col": 0, "size_x": 4, "size_y": 4}]
        }))
        .unwrap();
        assert_eq!(dashboard.dashcards.len(), 1);
    }
}
