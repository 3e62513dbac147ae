//! Raw config types matching resources.json / relationships.json.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ColumnConfig {
    pub name: String,
    /// PostgreSQL type name (e.g. "bigint", "uuid", "timestamptz"). Used for casts and id parsing.
    #[serde(default, rename = "type")]
    pub type_: Option<String>,
    #[serde(default = "default_true")]
    pub nullable: bool,
    /// Any DB-side default (literal or expression); only its presence matters here.
    #[serde(default)]
    pub default: Option<serde_json::Value>,
}

fn default_true() -> bool {
    true
}

/// Vertical parent link. Short form is just the parent resource name; the child's primary key then
/// references the parent's primary key.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParentConfig {
    Name(String),
    Link {
        resource: String,
        #[serde(default)]
        local_field: Option<String>,
        #[serde(default)]
        referenced_field: Option<String>,
    },
}

impl ParentConfig {
    pub fn resource(&self) -> &str {
        match self {
            ParentConfig::Name(name) => name,
            ParentConfig::Link { resource, .. } => resource,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ValidationRule {
    #[serde(default)]
    pub required: Option<bool>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub min_length: Option<u32>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub allowed: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub minimum: Option<f64>,
    #[serde(default)]
    pub maximum: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Plural resource name; also the API path segment.
    pub name: String,
    #[serde(default)]
    pub singular: Option<String>,
    /// Plural table name. Defaults to `name`.
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub singular_table: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    pub primary_key: String,
    /// Empty means "introspect from the database".
    #[serde(default)]
    pub columns: Vec<ColumnConfig>,
    /// Columns never serialized (password hashes, secrets). Inherited by child resources.
    #[serde(default)]
    pub block_columns: Vec<String>,
    #[serde(default)]
    pub parent: Option<ParentConfig>,
    #[serde(default)]
    pub validation: HashMap<String, ValidationRule>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThroughConfig {
    pub resource: String,
    /// Intermediate column matched against the owner's local field.
    pub local_field: String,
    /// Intermediate column matched against the referenced field.
    pub referenced_field: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelationshipConfig {
    /// Owning resource name.
    pub resource: String,
    /// One of belongs_to, has_one, has_many, has_many_through.
    pub kind: String,
    pub local_field: String,
    pub references: String,
    pub referenced_field: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub alias_singular: Option<String>,
    #[serde(default)]
    pub through: Option<ThroughConfig>,
    /// Route this edge to a registered hook instead of standard resolution.
    #[serde(default)]
    pub custom: bool,
    /// Declared parent of the referenced resource; must agree with that resource's own parent.
    #[serde(default)]
    pub parent: Option<String>,
}

/// All config in one struct for in-memory loading.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FullConfig {
    #[serde(default)]
    pub schema: Option<String>,
    pub resources: Vec<ResourceConfig>,
    #[serde(default)]
    pub relationships: Vec<RelationshipConfig>,
}
