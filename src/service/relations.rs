//! Relationship set resolution: which edges one response build traverses.

use crate::config::{Relationship, ResolvedModel, ResourceType};
use crate::error::ConfigError;
use std::collections::HashSet;
use std::convert::Infallible;
use std::str::FromStr;
use std::sync::OnceLock;

/// The client's `include` expression.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum RelationSelector {
    /// Parent-chain relationships only.
    #[default]
    None,
    All,
    /// Names matched against alias first, then the referenced table.
    Named(Vec<String>),
}

impl FromStr for RelationSelector {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Ok(match s.to_lowercase().as_str() {
            "" | "none" => RelationSelector::None,
            "all" | "*" => RelationSelector::All,
            _ => RelationSelector::Named(
                s.split(',')
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
        })
    }
}

#[derive(Clone, Debug)]
pub struct ActiveRelation<'a> {
    pub key: String,
    pub relation: &'a Relationship,
    /// Merged into the owning record (parent edge, has-one, or an edge into one of the owner's ancestors).
    pub merged: bool,
}

/// Resolved edges keyed by alias-or-type-name, parent chain first, then declaration order.
#[derive(Clone, Debug, Default)]
pub struct ActiveRelations<'a> {
    entries: Vec<ActiveRelation<'a>>,
}

impl<'a> ActiveRelations<'a> {
    /// First edge for a key wins.
    fn insert(&mut self, relation: &'a Relationship, ancestors: &HashSet<&str>) {
        if self.contains(relation.key()) {
            return;
        }
        self.entries.push(ActiveRelation {
            key: relation.key().to_string(),
            relation,
            merged: relation.is_merged() || ancestors.contains(relation.references.as_str()),
        });
    }

    pub fn get(&self, key: &str) -> Option<&ActiveRelation<'a>> {
        self.entries.iter().find(|e| e.key == key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActiveRelation<'a>> {
        self.entries.iter()
    }

    pub fn keys(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.key.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn matches_name(model: &ResolvedModel, relation: &Relationship, name: &str) -> bool {
    model
        .resource(&relation.references)
        .is_some_and(|r| r.table == name || r.name == name)
}

/// Compute the active set for `resource` under `selector`. Pure; see [`RelationSet`] for memoization.
pub fn resolve_relations<'a>(
    model: &'a ResolvedModel,
    resource: &'a ResourceType,
    selector: &RelationSelector,
) -> Result<ActiveRelations<'a>, ConfigError> {
    let ancestors = model.ancestor_names(&resource.name)?;
    let mut active = ActiveRelations::default();
    for edge in model.chain_relations(&resource.name)? {
        active.insert(edge, &ancestors);
    }
    match selector {
        RelationSelector::None => {}
        RelationSelector::All => {
            for rel in &resource.relationships {
                active.insert(rel, &ancestors);
            }
        }
        RelationSelector::Named(names) => {
            let mut picked: Vec<&Relationship> = Vec::new();
            for name in names {
                let found = resource
                    .relationships
                    .iter()
                    .find(|r| r.alias.as_deref() == Some(name.as_str()))
                    .or_else(|| resource.relationships.iter().find(|r| matches_name(model, r, name)));
                match found {
                    Some(rel) => picked.push(rel),
                    None => tracing::debug!(resource = %resource.name, name = %name, "ignoring unknown relationship"),
                }
            }
            for rel in resource.relationships.iter().filter(|r| picked.iter().any(|p| std::ptr::eq(*p, *r))) {
                active.insert(rel, &ancestors);
            }
        }
    }
    Ok(active)
}

/// Active set for one response build, computed on first use and fixed afterwards.
#[derive(Debug, Default)]
pub struct RelationSet<'a> {
    cell: OnceLock<ActiveRelations<'a>>,
}

impl<'a> RelationSet<'a> {
    pub fn new() -> Self {
        RelationSet { cell: OnceLock::new() }
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.get().is_some()
    }

    /// Later calls return the first result regardless of arguments.
    pub fn load(
        &self,
        model: &'a ResolvedModel,
        resource: &'a ResourceType,
        selector: &RelationSelector,
    ) -> Result<&ActiveRelations<'a>, ConfigError> {
        if let Some(active) = self.cell.get() {
            return Ok(active);
        }
        let computed = resolve_relations(model, resource, selector)?;
        Ok(self.cell.get_or_init(|| computed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve, FullConfig};
    use serde_json::json;

    fn model() -> ResolvedModel {
        let cfg: FullConfig = serde_json::from_value(json!({
            "resources": [
                { "name": "nodes", "primary_key": "id", "columns": [{ "name": "id" }] },
                { "name": "contents", "primary_key": "id", "parent": "nodes", "columns": [{ "name": "id" }] },
                { "name": "posts", "primary_key": "id", "parent": "contents",
                  "columns": [{ "name": "id" }, { "name": "author_id" }] },
                { "name": "users", "primary_key": "id", "columns": [{ "name": "id" }] },
                { "name": "comments", "primary_key": "id",
                  "columns": [{ "name": "id" }, { "name": "post_id" }, { "name": "parent_id" }] }
            ],
            "relationships": [
                { "resource": "posts", "kind": "belongs_to", "local_field": "author_id",
                  "references": "users", "referenced_field": "id" },
                { "resource": "posts", "kind": "has_many", "alias": "responses", "local_field": "id",
                  "references": "comments", "referenced_field": "post_id" },
                { "resource": "posts", "kind": "has_many", "local_field": "id",
                  "references": "comments", "referenced_field": "post_id" },
                { "resource": "comments", "kind": "has_many", "alias": "replies", "local_field": "id",
                  "references": "comments", "referenced_field": "parent_id" },
                { "resource": "posts", "kind": "belongs_to", "alias": "root", "local_field": "id",
                  "references": "nodes", "referenced_field": "id" }
            ]
        }))
        .unwrap();
        resolve(&cfg).unwrap()
    }

    #[test]
    fn selector_parses_keywords_and_lists() {
        assert_eq!("".parse::<RelationSelector>().unwrap(), RelationSelector::None);
        assert_eq!("ALL".parse::<RelationSelector>().unwrap(), RelationSelector::All);
        assert_eq!(
            "responses, users,".parse::<RelationSelector>().unwrap(),
            RelationSelector::Named(vec!["responses".into(), "users".into()])
        );
    }

    #[test]
    fn none_still_loads_the_whole_parent_chain() {
        let model = model();
        let posts = model.resource("posts").unwrap();
        let active = resolve_relations(&model, posts, &RelationSelector::None).unwrap();
        assert_eq!(active.keys(), vec!["contents", "nodes"]);
        assert!(active.iter().all(|e| e.merged));
    }

    #[test]
    fn alias_matches_before_table_name() {
        let model = model();
        let posts = model.resource("posts").unwrap();
        let selector = RelationSelector::Named(vec!["comments".into(), "responses".into()]);
        let active = resolve_relations(&model, posts, &selector).unwrap();
        assert_eq!(active.keys(), vec!["contents", "nodes", "responses", "comments"]);
        assert!(!active.get("responses").unwrap().merged);
    }

    #[test]
    fn unknown_names_are_ignored() {
        let model = model();
        let posts = model.resource("posts").unwrap();
        let selector = RelationSelector::Named(vec!["bogus_name".into()]);
        let active = resolve_relations(&model, posts, &selector).unwrap();
        assert_eq!(active.keys(), vec!["contents", "nodes"]);
    }

    #[test]
    fn all_includes_every_declared_edge() {
        let model = model();
        let posts = model.resource("posts").unwrap();
        let active = resolve_relations(&model, posts, &RelationSelector::All).unwrap();
        assert_eq!(active.len(), 6);
        assert!(active.get("root").unwrap().merged);
    }

    #[test]
    fn edge_back_into_the_same_type_is_side_loaded() {
        let model = model();
        let comments = model.resource("comments").unwrap();
        let active = resolve_relations(&model, comments, &RelationSelector::All).unwrap();
        assert_eq!(active.keys(), vec!["replies"]);
        assert!(!active.get("replies").unwrap().merged);
    }

    #[test]
    fn second_load_is_a_no_op() {
        let model = model();
        let posts = model.resource("posts").unwrap();
        let set = RelationSet::new();
        assert!(!set.is_loaded());
        let first = set.load(&model, posts, &RelationSelector::All).unwrap().keys().join(",");
        let second = set.load(&model, posts, &RelationSelector::None).unwrap().keys().join(",");
        assert_eq!(first, second);
        assert!(set.is_loaded());
    }
}
