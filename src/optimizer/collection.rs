//! Collection reduction.

use super::decode;
use crate::error::ServerError;
use crate::resource::ResourceKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizedCollection {
    pub id: u64,
    pub name: Option<String>,
    pub description: Option<String>,
    pub slug: Option<String>,
    pub location: Option<String>,
    pub effective_ancestors: Vec<Ancestor>,
    pub personal_owner_id: Option<u64>,
    pub is_personal: bool,
    pub is_sample: Option<bool>,
}

/// An ancestor in the collection path. The root collection's id is the
/// string `"root"`, so ids are kept as raw JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ancestor {
    pub id: Value,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawCollection {
    id: u64,
    name: Option<String>,
    description: Option<String>,
    slug: Option<String>,
    location: Option<String>,
    effective_ancestors: Option<Vec<Ancestor>>,
    personal_owner_id: Option<u64>,
    is_personal: Option<bool>,
    is_sample: Option<bool>,
}

pub(super) fn optimize(raw: Value) -> Result<OptimizedCollection, ServerError> {
    let raw: RawCollection = decode(ResourceKind::Collections, raw)?;
    let is_personal = raw
        .is_personal
        .unwrap_or(raw.personal_owner_id.is_some());

    Ok(OptimizedCollection {
        id: raw.id,
        name: raw.name,
        description: raw.description,
        slug: raw.slug,
        location: raw.location,
        effective_ancestors: raw.effective_ancestors.unwrap_or_default(),
        personal_owner_id: raw.personal_owner_id,
        is_personal,
        is_sample: raw.is_sample,
    })
}
