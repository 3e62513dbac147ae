//! Build the resolved registry from config; load config from disk; introspect missing columns.

use crate::config::resolved::{
    ColumnInfo, ParentLink, PkType, RelationKind, Relationship, ResolvedModel, ResourceType, ThroughSpec,
};
use crate::config::types::*;
use crate::config::{validate, ColumnPolicy};
use crate::error::ConfigError;
use crate::inflect::{ids_field, singularize};
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};
use std::path::Path;

const DEFAULT_SCHEMA: &str = "public";

/// Build resolved model from full config. Validates first.
pub fn resolve(config: &FullConfig) -> Result<ResolvedModel, ConfigError> {
    validate(config)?;
    let default_schema = config.schema.as_deref().unwrap_or(DEFAULT_SCHEMA);
    let by_name: HashMap<&str, &ResourceConfig> = config.resources.iter().map(|r| (r.name.as_str(), r)).collect();

    let mut resources: Vec<ResourceType> = Vec::with_capacity(config.resources.len());
    for rc in &config.resources {
        if rc.columns.is_empty() {
            tracing::warn!(resource = %rc.name, "no columns configured; run introspect_columns before resolve");
        }
        let columns: Vec<ColumnInfo> = rc
            .columns
            .iter()
            .map(|c| ColumnInfo {
                name: c.name.clone(),
                nullable: c.nullable,
                has_default: c.default.is_some(),
                pg_type: c.type_.clone(),
            })
            .collect();
        let pk_type = PkType::from_pg_type(
            columns
                .iter()
                .find(|c| c.name == rc.primary_key)
                .and_then(|c| c.pg_type.as_deref()),
        );
        let blocked = effective_block_list(rc, &by_name);
        let policy = ColumnPolicy::derive(columns.iter().map(|c| c.name.as_str()), &blocked, &[]);
        let parent = rc.parent.as_ref().map(|p| parent_link(rc, p, &by_name));
        let table = rc.table.clone().unwrap_or_else(|| rc.name.clone());

        resources.push(ResourceType {
            name: rc.name.clone(),
            singular_name: rc.singular.clone().unwrap_or_else(|| singularize(&rc.name)),
            singular_table: rc.singular_table.clone().unwrap_or_else(|| singularize(&table)),
            table,
            schema_name: rc.schema.clone().unwrap_or_else(|| default_schema.to_string()),
            primary_key: rc.primary_key.clone(),
            pk_type,
            columns,
            policy,
            parent,
            parent_relation: None,
            relationships: Vec::new(),
            validation: rc.validation.clone(),
        });
    }

    let parent_edges: Vec<Option<Relationship>> = resources
        .iter()
        .map(|r| {
            r.parent.as_ref().map(|link| {
                let parent = resources.iter().find(|p| p.name == link.resource);
                Relationship {
                    owner: r.name.clone(),
                    kind: RelationKind::BelongsTo,
                    local_field: link.local_field.clone(),
                    references: link.resource.clone(),
                    referenced_field: link.referenced_field.clone(),
                    alias: None,
                    through: None,
                    custom: false,
                    referenced_parent: parent.and_then(|p| p.parent.as_ref()).map(|l| l.resource.clone()),
                    vertical: true,
                    storage_key: parent.map(|p| p.table.clone()).unwrap_or_else(|| link.resource.clone()),
                    ids_field: String::new(),
                }
            })
        })
        .collect();
    for (resource, edge) in resources.iter_mut().zip(parent_edges) {
        resource.parent_relation = edge;
    }

    let mut edges: Vec<Relationship> = Vec::with_capacity(config.relationships.len());
    for rel in &config.relationships {
        edges.push(build_relationship(rel, &resources)?);
    }
    for edge in edges {
        let owner = resources
            .iter_mut()
            .find(|r| r.name == edge.owner)
            .ok_or_else(|| ConfigError::MissingReference {
                kind: "resource",
                id: edge.owner.clone(),
            })?;
        let taken: HashSet<&str> = owner
            .relationships
            .iter()
            .chain(owner.parent_relation.iter())
            .map(Relationship::key)
            .collect();
        if taken.contains(edge.key()) {
            return Err(ConfigError::DuplicateRelation {
                resource: owner.name.clone(),
                key: edge.key().to_string(),
            });
        }
        owner.relationships.push(edge);
    }

    Ok(ResolvedModel::new(resources))
}

/// Parent's effective block list followed by the resource's own, root first.
fn effective_block_list<'a>(rc: &'a ResourceConfig, by_name: &HashMap<&str, &'a ResourceConfig>) -> Vec<String> {
    let mut lineage = vec![rc];
    let mut current = rc;
    while let Some(parent) = current.parent.as_ref().and_then(|p| by_name.get(p.resource()).copied()) {
        lineage.push(parent);
        current = parent;
    }
    let mut blocked: Vec<String> = Vec::new();
    for r in lineage.iter().rev() {
        for c in &r.block_columns {
            if !blocked.contains(c) {
                blocked.push(c.clone());
            }
        }
    }
    blocked
}

fn parent_link(rc: &ResourceConfig, parent: &ParentConfig, by_name: &HashMap<&str, &ResourceConfig>) -> ParentLink {
    let parent_pk = by_name
        .get(parent.resource())
        .map(|p| p.primary_key.clone())
        .unwrap_or_else(|| rc.primary_key.clone());
    match parent {
        ParentConfig::Name(name) => ParentLink {
            resource: name.clone(),
            local_field: rc.primary_key.clone(),
            referenced_field: parent_pk,
        },
        ParentConfig::Link {
            resource,
            local_field,
            referenced_field,
        } => ParentLink {
            resource: resource.clone(),
            local_field: local_field.clone().unwrap_or_else(|| rc.primary_key.clone()),
            referenced_field: referenced_field.clone().unwrap_or(parent_pk),
        },
    }
}

fn build_relationship(rel: &RelationshipConfig, resources: &[ResourceType]) -> Result<Relationship, ConfigError> {
    let kind: RelationKind = rel.kind.parse().map_err(|kind| ConfigError::UnknownRelationKind {
        resource: rel.resource.clone(),
        kind,
    })?;
    let referenced = resources
        .iter()
        .find(|r| r.name == rel.references)
        .ok_or_else(|| ConfigError::MissingReference {
            kind: "resource",
            id: rel.references.clone(),
        })?;
    let singular = rel
        .alias_singular
        .clone()
        .or_else(|| rel.alias.as_deref().map(singularize))
        .unwrap_or_else(|| referenced.singular_name.clone());
    Ok(Relationship {
        owner: rel.resource.clone(),
        kind,
        local_field: rel.local_field.clone(),
        references: rel.references.clone(),
        referenced_field: rel.referenced_field.clone(),
        alias: rel.alias.clone(),
        through: rel.through.as_ref().map(|t| ThroughSpec {
            resource: t.resource.clone(),
            local_field: t.local_field.clone(),
            referenced_field: t.referenced_field.clone(),
        }),
        custom: rel.custom,
        referenced_parent: rel
            .parent
            .clone()
            .or_else(|| referenced.parent.as_ref().map(|p| p.resource.clone())),
        vertical: false,
        storage_key: rel.alias.clone().unwrap_or_else(|| referenced.table.clone()),
        ids_field: ids_field(&singular),
    })
}

/// Load `resources.json` and optional `relationships.json` from a directory.
pub async fn load_from_dir(dir: impl AsRef<Path>) -> Result<FullConfig, ConfigError> {
    let dir = dir.as_ref();
    let resources_raw = tokio::fs::read_to_string(dir.join("resources.json"))
        .await
        .map_err(|e| ConfigError::Load(format!("resources.json: {}", e)))?;
    let resources: Vec<ResourceConfig> =
        serde_json::from_str(&resources_raw).map_err(|e| ConfigError::Load(format!("resources.json: {}", e)))?;
    let relationships: Vec<RelationshipConfig> = match tokio::fs::read_to_string(dir.join("relationships.json")).await {
        Ok(raw) => serde_json::from_str(&raw).map_err(|e| ConfigError::Load(format!("relationships.json: {}", e)))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(ConfigError::Load(format!("relationships.json: {}", e))),
    };
    Ok(FullConfig {
        schema: std::env::var("SIDELOAD_SCHEMA").ok(),
        resources,
        relationships,
    })
}

/// Fill in column lists for resources that declare none, from `information_schema`.
pub async fn introspect_columns(pool: &PgPool, config: &mut FullConfig) -> Result<(), ConfigError> {
    let default_schema = config.schema.clone().unwrap_or_else(|| DEFAULT_SCHEMA.to_string());
    for rc in config.resources.iter_mut().filter(|r| r.columns.is_empty()) {
        let schema = rc.schema.clone().unwrap_or_else(|| default_schema.clone());
        let table = rc.table.clone().unwrap_or_else(|| rc.name.clone());
        let sql = "SELECT column_name, data_type, udt_name, is_nullable, column_default \
                   FROM information_schema.columns \
                   WHERE table_schema = $1 AND table_name = $2 \
                   ORDER BY ordinal_position";
        tracing::debug!(sql = %sql, schema = %schema, table = %table, "query");
        let rows = sqlx::query_as::<_, (String, String, String, String, Option<String>)>(sql)
            .bind(&schema)
            .bind(&table)
            .fetch_all(pool)
            .await
            .map_err(|e| ConfigError::Load(e.to_string()))?;
        if rows.is_empty() {
            return Err(ConfigError::MissingReference {
                kind: "table",
                id: format!("{}.{}", schema, table),
            });
        }
        rc.columns = rows
            .into_iter()
            .map(|(name, data_type, udt_name, is_nullable, default)| ColumnConfig {
                name,
                type_: Some(if data_type == "USER-DEFINED" {
                    format!("{}.{}", schema, udt_name)
                } else {
                    data_type
                }),
                nullable: is_nullable.eq_ignore_ascii_case("YES"),
                default: default.map(serde_json::Value::String),
            })
            .collect();
    }
    Ok(())
}
