//! Card (saved question) reduction.

use super::decode;
use crate::error::ServerError;
use crate::resource::ResourceKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reduced card.
///
/// Drops `result_metadata` (per-column fingerprints), `visualization_settings`,
/// embedding/public sharing fields and moderation reviews.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizedCard {
    pub id: u64,
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub card_type: Option<String>,
    pub query_type: Option<String>,
    pub display: Option<String>,
    pub database_id: Option<u64>,
    pub table_id: Option<u64>,
    pub collection_id: Option<u64>,
    pub dataset_query: Option<DatasetQuery>,
    pub parameters: Vec<Parameter>,
    pub view_count: Option<u64>,
    pub query_average_duration: Option<f64>,
    pub archived: Option<bool>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

/// The query behind a card. MBQL bodies are dropped; native SQL is kept.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetQuery {
    #[serde(rename = "type")]
    pub query_type: Option<String>,
    pub database: Option<u64>,
    pub native: Option<NativeQuery>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NativeQuery {
    pub query: Option<String>,
    pub template_tags: Option<Value>,
}

/// Card or dashboard filter parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Parameter {
    pub id: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub param_type: Option<String>,
    pub slug: Option<String>,
    pub target: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub(super) struct RawCard {
    id: u64,
    name: Option<String>,
    description: Option<String>,
    #[serde(rename = "type")]
    card_type: Option<String>,
    query_type: Option<String>,
    display: Option<String>,
    database_id: Option<u64>,
    table_id: Option<u64>,
    collection_id: Option<u64>,
    dataset_query: Option<RawDatasetQuery>,
    parameters: Option<Vec<RawParameter>>,
    view_count: Option<u64>,
    query_average_duration: Option<f64>,
    archived: Option<bool>,
    created_at: Option<String>,
    updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawDatasetQuery {
    #[serde(rename = "type")]
    query_type: Option<String>,
    database: Option<u64>,
    native: Option<RawNativeQuery>,
}

#[derive(Debug, Deserialize)]
struct RawNativeQuery {
    query: Option<String>,
    #[serde(rename = "template-tags", alias = "template_tags")]
    template_tags: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub(super) struct RawParameter {
    id: Option<String>,
    name: Option<String>,
    #[serde(rename = "type")]
    param_type: Option<String>,
    slug: Option<String>,
    target: Option<Value>,
}

impl From<RawParameter> for Parameter {
    fn from(raw: RawParameter) -> Self {
        Self {
            id: raw.id,
            name: raw.name,
            param_type: raw.param_type,
            slug: raw.slug,
            target: raw.target,
        }
    }
}

/// Map raw parameters, treating an absent list as empty.
pub(super) fn reduce_parameters(raw: Option<Vec<RawParameter>>) -> Vec<Parameter> {
    raw.unwrap_or_default().into_iter().map(Parameter::from).collect()
}

impl From<RawCard> for OptimizedCard {
    fn from(raw: RawCard) -> Self {
        let dataset_query = raw.dataset_query.map(|q| DatasetQuery {
            query_type: q.query_type,
            database: q.database,
            native: q.native.map(|n| NativeQuery {
                query: n.query,
                template_tags: n.template_tags,
            }),
        });

        Self {
            id: raw.id,
            name: raw.name,
            description: raw.description,
            card_type: raw.card_type,
            query_type: raw.query_type,
            display: raw.display,
            database_id: raw.database_id,
            table_id: raw.table_id,
            collection_id: raw.collection_id,
            dataset_query,
            parameters: reduce_parameters(raw.parameters),
            view_count: raw.view_count,
            query_average_duration: raw.query_average_duration,
            archived: raw.archived,
            created_at: raw.created_at,
            updated_at: raw.updated_at,
        }
    }
}

pub(super) fn optimize(raw: Value) -> Result<OptimizedCard, ServerError> {
    let raw: RawCard = decode(ResourceKind::Cards, raw)?;
    Ok(raw.into())
}
