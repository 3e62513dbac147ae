//! Row shaping: turns joined result rows into payload records and links related records.

use crate::config::{Relationship, ResourceType};
use crate::query::{Record, Row};
use crate::response::ResponsePayload;
use serde_json::Value;
use std::collections::HashMap;

/// Which labelled parts of a row make up one record. `merged` parts (parent chain, has-one)
/// only fill fields the record does not already carry, so the primary part wins collisions.
/// Labels outside the shape (a through table) are dropped.
#[derive(Clone, Debug)]
pub struct RowShape<'a> {
    pub label: String,
    pub resource: &'a ResourceType,
    pub merged: Vec<(String, &'a ResourceType)>,
}

impl<'a> RowShape<'a> {
    pub fn new(label: impl Into<String>, resource: &'a ResourceType) -> Self {
        RowShape {
            label: label.into(),
            resource,
            merged: Vec::new(),
        }
    }

    pub fn merge(&mut self, label: impl Into<String>, resource: &'a ResourceType) {
        self.merged.push((label.into(), resource));
    }

    /// Non-null `field` from the primary part, then from merged parts in order.
    pub fn lookup<'r>(&self, row: &'r Row, field: &str) -> Option<&'r Value> {
        row.value(&self.label, field)
            .or_else(|| self.merged.iter().find_map(|(label, _)| row.value(label, field)))
    }
}

pub fn allowed_fields(resource: &ResourceType, part: &Record) -> Record {
    resource
        .policy
        .allowed()
        .iter()
        .filter_map(|c| part.get(c).map(|v| (c.clone(), v.clone())))
        .collect()
}

fn has_key(resource: &ResourceType, part: &Record) -> bool {
    part.get(&resource.primary_key).is_some_and(|v| !v.is_null())
}

/// Fill `target` with fields it does not have yet.
pub fn merge_missing(target: &mut Record, source: Record) {
    for (k, v) in source {
        target.entry(k).or_insert(v);
    }
}

/// One related record from `row`, or `None` when the row carries no related record.
pub fn normalize_row(shape: &RowShape<'_>, row: &Row) -> Option<Record> {
    let part = row.part(&shape.label)?;
    if !has_key(shape.resource, part) {
        return None;
    }
    let mut record = allowed_fields(shape.resource, part);
    if let Row::Joined(_) = row {
        for (label, resource) in &shape.merged {
            if let Some(extra) = row.part(label).filter(|p| has_key(resource, p)) {
                merge_missing(&mut record, allowed_fields(resource, extra));
            }
        }
    }
    Some(record)
}

/// The primary record of a base-query row, merged with its ancestors and has-one records.
/// The primary type's fields win on name collisions.
pub fn extract_base_row(shape: &RowShape<'_>, row: &Row) -> Record {
    normalize_row(shape, row).unwrap_or_else(|| {
        row.part(&shape.label)
            .map(|p| allowed_fields(shape.resource, p))
            .unwrap_or_default()
    })
}

/// Related rows as flat records: intermediate parts dropped, blocked columns removed,
/// rows without a related record (outer-join misses) skipped.
pub fn normalize_related(shape: &RowShape<'_>, rows: &[Row]) -> Vec<Record> {
    rows.iter().filter_map(|row| normalize_row(shape, row)).collect()
}

/// Side-load `records` under the relationship's payload key, de-duplicated. To-many edges also
/// write the related primary keys onto `owner` under the linkage field.
pub fn link_into(
    payload: &mut ResponsePayload,
    owner: &mut Record,
    relation: &Relationship,
    referenced: &ResourceType,
    records: Vec<Record>,
) {
    if relation.is_to_many() {
        let mut ids: Vec<Value> = Vec::with_capacity(records.len());
        for id in records.iter().filter_map(|r| r.get(&referenced.primary_key)) {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        owner.insert(relation.ids_field.clone(), Value::Array(ids));
    }
    payload.ensure_table(&relation.storage_key);
    for record in records {
        payload.push(&relation.storage_key, record, false);
    }
}

/// Map key for grouping related rows by match value.
pub fn group_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// To-many keys collected while base rows stream by, one entry per relationship.
#[derive(Debug, Default)]
pub struct DeferredRegistry {
    keys: Vec<(String, Vec<Value>)>,
    owners: Vec<Deferred>,
}

/// A base record waiting for batched relations: its payload position and match value per relation.
#[derive(Debug)]
struct Deferred {
    position: usize,
    keys: Vec<(String, Option<Value>)>,
}

impl DeferredRegistry {
    pub fn new() -> Self {
        DeferredRegistry::default()
    }

    /// Note that `relation_key` needs `value`. Keys stay unique per relation, in first-seen order.
    pub fn register(&mut self, relation_key: &str, value: Option<&Value>) {
        let idx = match self.keys.iter().position(|(k, _)| k == relation_key) {
            Some(idx) => idx,
            None => {
                self.keys.push((relation_key.to_string(), Vec::new()));
                self.keys.len() - 1
            }
        };
        if let Some(v) = value {
            let values = &mut self.keys[idx].1;
            if !values.contains(v) {
                values.push(v.clone());
            }
        }
    }

    /// Track a base record stored at `position` with its match value per deferred relation.
    pub fn track(&mut self, position: usize, keys: Vec<(String, Option<Value>)>) {
        if !keys.is_empty() {
            self.owners.push(Deferred { position, keys });
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Relations with their collected keys, in registration order.
    pub fn relations(&self) -> impl Iterator<Item = (&str, &[Value])> {
        self.keys.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Attach grouped records for `relation` to every tracked base record, in base order.
    /// Base records with no match get an empty linkage list.
    pub fn reconcile(
        &self,
        payload: &mut ResponsePayload,
        root_key: &str,
        relation: &Relationship,
        referenced: &ResourceType,
        grouped: &HashMap<String, Vec<Record>>,
    ) {
        for owner in &self.owners {
            let Some((_, key)) = owner.keys.iter().find(|(k, _)| k == relation.key()) else {
                continue;
            };
            let records = key
                .as_ref()
                .and_then(|k| grouped.get(&group_key(k)))
                .cloned()
                .unwrap_or_default();
            let mut base = match payload.record_mut(root_key, owner.position) {
                Some(base) => std::mem::take(base),
                None => continue,
            };
            link_into(payload, &mut base, relation, referenced, records);
            if let Some(slot) = payload.record_mut(root_key, owner.position) {
                *slot = base;
            }
        }
    }
}

/// Second phase of the batched strategy. Each item is a deferred relation with its related
/// records already grouped by match value.
pub fn reconcile_deferred<'a>(
    registry: &DeferredRegistry,
    payload: &mut ResponsePayload,
    root_key: &str,
    relations: impl IntoIterator<Item = (&'a Relationship, &'a ResourceType, HashMap<String, Vec<Record>>)>,
) {
    for (relation, referenced, grouped) in relations {
        registry.reconcile(payload, root_key, relation, referenced, &grouped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve, FullConfig, ResolvedModel};
    use serde_json::json;

    fn model() -> ResolvedModel {
        let cfg: FullConfig = serde_json::from_value(json!({
            "resources": [
                { "name": "contents", "primary_key": "id", "block_columns": ["secret"],
                  "columns": [{ "name": "id" }, { "name": "title" }, { "name": "secret" }] },
                { "name": "posts", "primary_key": "id", "parent": "contents",
                  "columns": [{ "name": "id" }, { "name": "title" }, { "name": "body" }] },
                { "name": "comments", "primary_key": "id",
                  "columns": [{ "name": "id" }, { "name": "post_id" }, { "name": "text" }] }
            ],
            "relationships": [
                { "resource": "posts", "kind": "has_many", "alias": "responses", "local_field": "id",
                  "references": "comments", "referenced_field": "post_id" }
            ]
        }))
        .unwrap();
        resolve(&cfg).unwrap()
    }

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn child_fields_win_and_blocked_parent_fields_vanish() {
        let model = model();
        let posts = model.resource("posts").unwrap();
        let mut shape = RowShape::new("posts", posts);
        shape.merge("contents", model.resource("contents").unwrap());
        let row = Row::Joined(vec![
            ("posts".into(), record(json!({ "id": 10, "title": "child", "body": "b" }))),
            ("contents".into(), record(json!({ "id": 10, "title": "parent", "secret": "s" }))),
        ]);
        let base = extract_base_row(&shape, &row);
        assert_eq!(base, record(json!({ "id": 10, "title": "child", "body": "b" })));
    }

    #[test]
    fn outer_join_misses_are_not_related_records() {
        let model = model();
        let shape = RowShape::new("comments", model.resource("comments").unwrap());
        let rows = vec![
            Row::Joined(vec![("comments".into(), record(json!({ "id": null, "post_id": null, "text": null })))]),
            Row::Flat(record(json!({ "id": 5, "post_id": 10, "text": "hi" }))),
        ];
        assert_eq!(normalize_related(&shape, &rows).len(), 1);
    }

    #[test]
    fn link_writes_ids_and_dedups_side_loads() {
        let model = model();
        let posts = model.resource("posts").unwrap();
        let rel = &posts.relationships[0];
        let comments = model.resource("comments").unwrap();
        let mut payload = ResponsePayload::new();
        let mut owner = record(json!({ "id": 10 }));
        let c5 = record(json!({ "id": 5, "post_id": 10, "text": "a" }));
        link_into(&mut payload, &mut owner, rel, comments, vec![c5.clone(), c5]);
        assert_eq!(owner["response_ids"], json!([5]));
        assert_eq!(payload.records("responses").len(), 1);
    }

    #[test]
    fn reconcile_attaches_groups_in_base_order() {
        let model = model();
        let posts = model.resource("posts").unwrap();
        let rel = &posts.relationships[0];
        let comments = model.resource("comments").unwrap();

        let mut payload = ResponsePayload::new();
        let mut registry = DeferredRegistry::new();
        for id in [10, 11] {
            let pos = payload.push("posts", record(json!({ "id": id })), true).unwrap();
            registry.register("responses", Some(&json!(id)));
            registry.track(pos, vec![("responses".into(), Some(json!(id)))]);
        }
        assert_eq!(registry.relations().next().unwrap().1, &[json!(10), json!(11)]);

        let mut grouped = HashMap::new();
        grouped.insert("10".to_string(), vec![record(json!({ "id": 5, "post_id": 10, "text": "a" }))]);
        reconcile_deferred(&registry, &mut payload, "posts", [(rel, comments, grouped)]);

        assert_eq!(payload.records("posts")[0]["response_ids"], json!([5]));
        assert_eq!(payload.records("posts")[1]["response_ids"], json!([]));
        assert_eq!(payload.records("responses").len(), 1);
    }
}
