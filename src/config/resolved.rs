//! Resolved resource model: config validated and flattened for runtime use.

use crate::config::{ColumnPolicy, ValidationRule};
use crate::error::ConfigError;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;

/// Primary key type for parsing path/body ids.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PkType {
    Uuid,
    BigInt,
    Int,
    Text,
}

impl PkType {
    pub fn from_pg_type(pg_type: Option<&str>) -> Self {
        let lower = pg_type.unwrap_or("").to_lowercase();
        if lower.contains("uuid") {
            PkType::Uuid
        } else if lower.contains("bigserial") || lower.contains("bigint") || lower == "int8" {
            PkType::BigInt
        } else if lower.contains("serial") || lower.contains("int") {
            PkType::Int
        } else if lower.is_empty() {
            // Untyped config columns: assume the common integer surrogate key.
            PkType::BigInt
        } else {
            PkType::Text
        }
    }
}

#[derive(Clone, Debug)]
pub struct ColumnInfo {
    pub name: String,
    pub nullable: bool,
    /// Whether the column has a DB default (serial, gen_random_uuid(), NOW()).
    pub has_default: bool,
    /// PostgreSQL type name used for casts when binding values.
    pub pg_type: Option<String>,
}

/// How a child row points at its vertical parent row.
#[derive(Clone, Debug)]
pub struct ParentLink {
    pub resource: String,
    /// Column on the child (usually its primary key).
    pub local_field: String,
    /// Column on the parent (usually its primary key).
    pub referenced_field: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelationKind {
    BelongsTo,
    HasOne,
    HasMany,
    HasManyThrough,
}

impl FromStr for RelationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "belongs_to" | "belongsto" => Ok(RelationKind::BelongsTo),
            "has_one" | "hasone" => Ok(RelationKind::HasOne),
            "has_many" | "hasmany" => Ok(RelationKind::HasMany),
            "has_many_through" | "hasmanythrough" => Ok(RelationKind::HasManyThrough),
            _ => Err(s.to_string()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ThroughSpec {
    pub resource: String,
    pub local_field: String,
    pub referenced_field: String,
}

/// One relationship edge, owned by `owner`.
#[derive(Clone, Debug)]
pub struct Relationship {
    pub owner: String,
    pub kind: RelationKind,
    pub local_field: String,
    pub references: String,
    pub referenced_field: String,
    pub alias: Option<String>,
    pub through: Option<ThroughSpec>,
    pub custom: bool,
    /// Parent of the referenced resource, joined into every related query.
    pub referenced_parent: Option<String>,
    /// Synthesized edge from a resource to its vertical parent.
    pub vertical: bool,
    /// Top-level payload key for side-loaded records (alias or referenced table).
    pub storage_key: String,
    /// `<singular>_ids` linkage field written onto the owner for to-many edges.
    pub ids_field: String,
}

impl Relationship {
    /// Canonical key: alias when present, else the referenced resource's name.
    pub fn key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.references)
    }

    /// Merged into the owning record rather than side-loaded.
    pub fn is_merged(&self) -> bool {
        self.vertical || self.kind == RelationKind::HasOne
    }

    pub fn is_to_many(&self) -> bool {
        matches!(self.kind, RelationKind::HasMany | RelationKind::HasManyThrough)
    }
}

#[derive(Clone, Debug)]
pub struct ResourceType {
    pub name: String,
    pub singular_name: String,
    pub table: String,
    pub singular_table: String,
    pub schema_name: String,
    pub primary_key: String,
    pub pk_type: PkType,
    pub columns: Vec<ColumnInfo>,
    pub policy: ColumnPolicy,
    pub parent: Option<ParentLink>,
    /// Edge to the parent, present iff `parent` is.
    pub parent_relation: Option<Relationship>,
    /// Declared relationships in declaration order.
    pub relationships: Vec<Relationship>,
    pub validation: HashMap<String, ValidationRule>,
}

impl ResourceType {
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

/// Column metadata as consumed by the engine.
pub trait ColumnMetadata {
    fn columns_of(&self, resource: &str) -> Vec<String>;
    fn primary_key_of(&self, resource: &str) -> Option<String>;
}

/// Immutable registry of every resource, built once at startup.
#[derive(Clone, Debug, Default)]
pub struct ResolvedModel {
    pub resources: Vec<ResourceType>,
    by_name: HashMap<String, usize>,
}

impl ResolvedModel {
    pub fn new(resources: Vec<ResourceType>) -> Self {
        let by_name = resources
            .iter()
            .enumerate()
            .map(|(i, r)| (r.name.clone(), i))
            .collect();
        ResolvedModel { resources, by_name }
    }

    pub fn resource(&self, name: &str) -> Option<&ResourceType> {
        self.by_name.get(name).map(|&i| &self.resources[i])
    }

    pub fn require(&self, name: &str) -> Result<&ResourceType, ConfigError> {
        self.resource(name).ok_or_else(|| ConfigError::MissingReference {
            kind: "resource",
            id: name.to_string(),
        })
    }

    /// Ancestors of `name`, nearest first. Empty for roots.
    pub fn parent_chain(&self, name: &str) -> Result<Vec<&ResourceType>, ConfigError> {
        let mut current = self.require(name)?;
        let mut seen: Vec<&str> = vec![current.name.as_str()];
        let mut chain = Vec::new();
        while let Some(link) = &current.parent {
            let parent = self.require(&link.resource)?;
            if seen.contains(&parent.name.as_str()) {
                seen.push(parent.name.as_str());
                return Err(ConfigError::CyclicParentChain(seen.join(" -> ")));
            }
            seen.push(parent.name.as_str());
            chain.push(parent);
            current = parent;
        }
        Ok(chain)
    }

    /// Parent edges of `name` and of each ancestor, nearest first.
    pub fn chain_relations(&self, name: &str) -> Result<Vec<&Relationship>, ConfigError> {
        let resource = self.require(name)?;
        let chain = self.parent_chain(name)?;
        Ok(std::iter::once(resource)
            .chain(chain)
            .filter_map(|r| r.parent_relation.as_ref())
            .collect())
    }

    /// Names of the ancestors of `name`; never `name` itself.
    pub fn ancestor_names(&self, name: &str) -> Result<HashSet<&str>, ConfigError> {
        Ok(self.parent_chain(name)?.into_iter().map(|r| r.name.as_str()).collect())
    }

    pub fn allowed_columns(&self, name: &str, include_prefix: bool) -> Vec<String> {
        self.resource(name)
            .map(|r| r.policy.allowed_columns(&r.table, include_prefix))
            .unwrap_or_default()
    }

    pub fn blocked_columns(&self, name: &str) -> Vec<String> {
        self.resource(name).map(|r| r.policy.blocked().to_vec()).unwrap_or_default()
    }
}

impl ColumnMetadata for ResolvedModel {
    fn columns_of(&self, resource: &str) -> Vec<String> {
        self.resource(resource)
            .map(|r| r.column_names().map(str::to_string).collect())
            .unwrap_or_default()
    }

    fn primary_key_of(&self, resource: &str) -> Option<String> {
        self.resource(resource).map(|r| r.primary_key.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare(name: &str, parent: Option<&str>) -> ResourceType {
        ResourceType {
            name: name.to_string(),
            singular_name: name.trim_end_matches('s').to_string(),
            table: name.to_string(),
            singular_table: name.trim_end_matches('s').to_string(),
            schema_name: "public".into(),
            primary_key: "id".into(),
            pk_type: PkType::BigInt,
            columns: Vec::new(),
            policy: ColumnPolicy::default(),
            parent: parent.map(|p| ParentLink {
                resource: p.to_string(),
                local_field: "id".into(),
                referenced_field: "id".into(),
            }),
            parent_relation: None,
            relationships: Vec::new(),
            validation: HashMap::new(),
        }
    }

    #[test]
    fn parent_chain_is_nearest_first() {
        let model = ResolvedModel::new(vec![
            bare("nodes", None),
            bare("contents", Some("nodes")),
            bare("posts", Some("contents")),
        ]);
        let chain: Vec<&str> = model.parent_chain("posts").unwrap().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(chain, vec!["contents", "nodes"]);
        assert!(model.parent_chain("nodes").unwrap().is_empty());
    }

    #[test]
    fn parent_chain_fails_fast_on_cycle() {
        let model = ResolvedModel::new(vec![bare("a", Some("b")), bare("b", Some("a"))]);
        match model.parent_chain("a") {
            Err(ConfigError::CyclicParentChain(path)) => assert_eq!(path, "a -> b -> a"),
            other => panic!("expected cycle error, got {:?}", other.map(|c| c.len())),
        }
    }

    #[test]
    fn relation_kinds_parse_and_reject_unknown() {
        assert_eq!("has_many".parse::<RelationKind>(), Ok(RelationKind::HasMany));
        assert_eq!("HasManyThrough".parse::<RelationKind>(), Ok(RelationKind::HasManyThrough));
        assert_eq!("belongs-to".parse::<RelationKind>(), Ok(RelationKind::BelongsTo));
        assert!("many_to_many".parse::<RelationKind>().is_err());
    }

    #[test]
    fn pk_type_follows_column_type() {
        assert_eq!(PkType::from_pg_type(Some("uuid")), PkType::Uuid);
        assert_eq!(PkType::from_pg_type(Some("bigserial")), PkType::BigInt);
        assert_eq!(PkType::from_pg_type(Some("integer")), PkType::Int);
        assert_eq!(PkType::from_pg_type(Some("text")), PkType::Text);
        assert_eq!(PkType::from_pg_type(None), PkType::BigInt);
    }
}
