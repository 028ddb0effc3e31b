//! Resource kinds exposed by the tool surface and their upstream endpoints.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the six first-class Metabase entity types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    #[serde(alias = "card")]
    Cards,
    #[serde(alias = "dashboard")]
    Dashboards,
    #[serde(alias = "table")]
    Tables,
    #[serde(alias = "database")]
    Databases,
    #[serde(alias = "collection")]
    Collections,
    #[serde(alias = "field")]
    Fields,
}

impl ResourceKind {
    /// Every kind, in a stable order.
    pub const ALL: [ResourceKind; 6] = [
        ResourceKind::Cards,
        ResourceKind::Dashboards,
        ResourceKind::Tables,
        ResourceKind::Databases,
        ResourceKind::Collections,
        ResourceKind::Fields,
    ];

    /// Plural name used by the tool surface and cache targets.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Cards => "cards",
            ResourceKind::Dashboards => "dashboards",
            ResourceKind::Tables => "tables",
            ResourceKind::Databases => "databases",
            ResourceKind::Collections => "collections",
            ResourceKind::Fields => "fields",
        }
    }

    /// Singular, human-facing name ("card", "dashboard", ...).
    pub fn singular(&self) -> &'static str {
        match self {
            ResourceKind::Cards => "card",
            ResourceKind::Dashboards => "dashboard",
            ResourceKind::Tables => "table",
            ResourceKind::Databases => "database",
            ResourceKind::Collections => "collection",
            ResourceKind::Fields => "field",
        }
    }

    /// Upstream path for a single item of this kind.
    ///
    /// Tables use `query_metadata` so the field list comes back in one call,
    /// databases ask for their tables inline.
    pub fn item_path(&self, id: u64) -> String {
        match self {
            ResourceKind::Cards => format!("/api/card/{id}"),
            ResourceKind::Dashboards => format!("/api/dashboard/{id}"),
            ResourceKind::Tables => format!("/api/table/{id}/query_metadata"),
            ResourceKind::Databases => format!("/api/database/{id}?include=tables"),
            ResourceKind::Collections => format!("/api/collection/{id}"),
            ResourceKind::Fields => format!("/api/field/{id}"),
        }
    }

    /// Upstream path listing every item of this kind, if one exists.
    pub fn list_path(&self) -> Option<&'static str> {
        match self {
            ResourceKind::Cards => Some("/api/card?f=all"),
            ResourceKind::Dashboards => Some("/api/dashboard"),
            ResourceKind::Tables => Some("/api/table"),
            ResourceKind::Databases => Some("/api/database"),
            ResourceKind::Collections => Some("/api/collection"),
            ResourceKind::Fields => None,
        }
    }

    /// Whether `list` is supported for this kind.
    pub fn is_listable(&self) -> bool {
        self.list_path().is_some()
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing an unknown resource kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseResourceKindError(String);

impl fmt::Display for ParseResourceKindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalid model '{}'. Valid models: cards, dashboards, tables, databases, collections, fields",
            self.0
        )
    }
}

impl std::error::Error for ParseResourceKindError {}

impl FromStr for ResourceKind {
    type Err = ParseResourceKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cards" | "card" | "questions" | "question" => Ok(ResourceKind::Cards),
            "dashboards" | "dashboard" => Ok(ResourceKind::Dashboards),
            "tables" | "table" => Ok(ResourceKind::Tables),
            "databases" | "database" => Ok(ResourceKind::Databases),
            "collections" | "collection" => Ok(ResourceKind::Collections),
            "fields" | "field" => Ok(ResourceKind::Fields),
            _ => Err(ParseResourceKindError(s.to_string())),
        }
    }
}
