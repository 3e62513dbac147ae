//! Read orchestration: base query, relationship loading (immediate or batched), payload assembly.

use super::assembler::{self, DeferredRegistry, RowShape};
use super::relations::{ActiveRelation, ActiveRelations, RelationSelector, RelationSet};
use super::search::SearchRequest;
use super::{hook_key, HookRegistry};
use crate::config::{RelationKind, Relationship, ResolvedModel, ResourceType};
use crate::error::{AppError, ConfigError};
use crate::query::{Executor, JoinKind, Record, Row, SelectQuery};
use crate::response::{Diagnostics, ResponsePayload};
use crate::settings::EngineSettings;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;

/// Inner-join every ancestor of `resource` (labelled by ancestor name) and merge them into `shape`.
pub(crate) fn join_parent_chain<'a>(
    model: &'a ResolvedModel,
    mut query: SelectQuery<'a>,
    resource: &'a ResourceType,
    label: &str,
    shape: &mut RowShape<'a>,
) -> Result<SelectQuery<'a>, ConfigError> {
    for edge in model.chain_relations(&resource.name)? {
        let parent = model.require(&edge.references)?;
        let left_label = if edge.owner == resource.name { label } else { edge.owner.as_str() };
        query = query.join(
            JoinKind::Inner,
            parent,
            parent.name.clone(),
            (left_label, &edge.local_field),
            &edge.referenced_field,
        );
        shape.merge(parent.name.clone(), parent);
    }
    Ok(query)
}

/// Resource name owning `field`: the resource itself, else the nearest ancestor with the column.
pub(crate) fn owning_label<'a>(
    model: &'a ResolvedModel,
    resource: &'a ResourceType,
    field: &str,
) -> Result<Option<&'a str>, ConfigError> {
    if resource.has_column(field) {
        return Ok(Some(resource.name.as_str()));
    }
    Ok(model
        .parent_chain(&resource.name)?
        .into_iter()
        .find(|r| r.has_column(field))
        .map(|r| r.name.as_str()))
}

/// Related records can be read straight off the base query when they need no joins of their own.
fn direct_belongs_to(referenced: &ResourceType) -> bool {
    referenced.parent.is_none() && !referenced.relationships.iter().any(|r| r.kind == RelationKind::HasOne)
}

struct BaseQuery<'a> {
    query: SelectQuery<'a>,
    shape: RowShape<'a>,
    /// Belongs-to keys joined into the base query.
    direct: Vec<String>,
}

fn base_query<'a>(
    model: &'a ResolvedModel,
    resource: &'a ResourceType,
    active: &ActiveRelations<'a>,
) -> Result<BaseQuery<'a>, ConfigError> {
    let label = resource.name.as_str();
    let mut shape = RowShape::new(label, resource);
    let mut query = join_parent_chain(model, SelectQuery::from(resource, label), resource, label, &mut shape)?;
    let mut direct = Vec::new();
    for entry in active.iter() {
        let rel = entry.relation;
        if rel.vertical || rel.custom {
            continue;
        }
        let referenced = model.require(&rel.references)?;
        let joinable = !query.has_label(&entry.key);
        if entry.merged {
            if !joinable {
                tracing::debug!(resource = %resource.name, relation = %entry.key, "already joined, skipping merge");
                continue;
            }
            query = query.join(JoinKind::Left, referenced, entry.key.clone(), (label, &rel.local_field), &rel.referenced_field);
            shape.merge(entry.key.clone(), referenced);
        } else if rel.kind == RelationKind::BelongsTo && joinable && direct_belongs_to(referenced) {
            query = query.join(JoinKind::Left, referenced, entry.key.clone(), (label, &rel.local_field), &rel.referenced_field);
            direct.push(entry.key.clone());
        }
    }
    Ok(BaseQuery { query, shape, direct })
}

/// Query for the records on the far side of `relation`, with their own parent chain and
/// has-one records merged, matched on `match_label.match_field`.
struct RelatedQuery<'a> {
    query: SelectQuery<'a>,
    shape: RowShape<'a>,
    match_label: String,
    match_field: String,
}

fn related_query<'a>(
    model: &'a ResolvedModel,
    relation: &Relationship,
    referenced: &'a ResourceType,
) -> Result<RelatedQuery<'a>, ConfigError> {
    let label = referenced.name.as_str();
    let mut shape = RowShape::new(label, referenced);
    let (query, match_label, match_field) = match (&relation.kind, &relation.through) {
        (RelationKind::HasManyThrough, Some(through)) => {
            let mid = model.require(&through.resource)?;
            let query = SelectQuery::from(mid, mid.name.clone()).join(
                JoinKind::Inner,
                referenced,
                label,
                (&mid.name, &through.referenced_field),
                &relation.referenced_field,
            );
            (query, mid.name.clone(), through.local_field.clone())
        }
        _ => (SelectQuery::from(referenced, label), label.to_string(), relation.referenced_field.clone()),
    };
    let mut query = join_parent_chain(model, query, referenced, label, &mut shape)?;
    for has_one in referenced
        .relationships
        .iter()
        .filter(|r| r.kind == RelationKind::HasOne && !r.custom)
    {
        let target = model.require(&has_one.references)?;
        if query.has_label(has_one.key()) {
            continue;
        }
        query = query.join(
            JoinKind::Left,
            target,
            has_one.key(),
            (label, &has_one.local_field),
            &has_one.referenced_field,
        );
        shape.merge(has_one.key(), target);
    }
    Ok(RelatedQuery {
        query,
        shape,
        match_label,
        match_field,
    })
}

/// State of one response build. Consumed by [`FindContext::find`] or [`FindContext::find_first`].
pub struct FindContext<'a> {
    model: &'a ResolvedModel,
    resource: &'a ResourceType,
    executor: &'a dyn Executor,
    settings: &'a EngineSettings,
    hooks: &'a HookRegistry,
    relations: RelationSet<'a>,
    payload: ResponsePayload,
    queries: u64,
    started: Instant,
}

impl<'a> FindContext<'a> {
    pub fn new(
        model: &'a ResolvedModel,
        resource: &'a ResourceType,
        executor: &'a dyn Executor,
        settings: &'a EngineSettings,
        hooks: &'a HookRegistry,
    ) -> Self {
        FindContext {
            model,
            resource,
            executor,
            settings,
            hooks,
            relations: RelationSet::new(),
            payload: ResponsePayload::new(),
            queries: 0,
            started: Instant::now(),
        }
    }

    /// Memoized: the first selector seen wins for the life of this context.
    pub fn load_active_relationships(&self, selector: &RelationSelector) -> Result<&ActiveRelations<'a>, ConfigError> {
        self.relations.load(self.model, self.resource, selector)
    }

    /// Collection read. `None` when an unpaged read matches nothing; paged and count-only reads always
    /// carry `meta`.
    pub async fn find(mut self, search: &SearchRequest) -> Result<Option<ResponsePayload>, AppError> {
        let active = self.load_active_relationships(search.relationship_selector())?.clone();
        let base = base_query(self.model, self.resource, &active)?;
        let query = self.apply_search(base.query.clone(), search)?;

        if search.is_count_only() {
            let total = self.count(&query).await?;
            let mut payload = ResponsePayload::new();
            payload.set_total(total);
            return Ok(Some(payload));
        }

        let page_size = search.page_size(self.settings);
        let mut paged = query.clone();
        if search.is_pager_requested() {
            paged.limit = Some(page_size);
            paged.offset = Some(search.offset(self.settings)?);
        } else {
            paged.limit = Some(self.settings.max_page_size);
        }
        let rows = self.fetch(&paged).await?;
        // A page past the end still reports totals.
        if rows.is_empty() && !search.is_pager_requested() {
            return Ok(None);
        }
        let returned = rows.len() as u64;
        let root_key = self.resource.table.clone();
        self.assemble(&base, &active, &rows, &root_key).await?;

        if search.is_pager_requested() {
            let total = self.count(&query).await?;
            let diagnostics = self.diagnostics();
            self.payload.append_meta(total, page_size, returned, diagnostics);
        } else if let Some(d) = self.diagnostics() {
            self.payload.append_diagnostics(d);
        }
        tracing::debug!(resource = %self.resource.name, rows = returned, queries = self.queries, "collection assembled");
        Ok(Some(self.payload))
    }

    /// Single-record read by primary key.
    pub async fn find_first(mut self, id: &Value, selector: &RelationSelector) -> Result<Option<ResponsePayload>, AppError> {
        let active = self.load_active_relationships(selector)?.clone();
        let base = base_query(self.model, self.resource, &active)?;
        let mut query = base
            .query
            .clone()
            .filter_eq(&base.shape.label, &self.resource.primary_key, id.clone());
        query.limit = Some(1);
        let rows = self.fetch(&query).await?;
        if rows.is_empty() {
            return Ok(None);
        }
        let root_key = if self.settings.singular_record_key {
            self.resource.singular_table.clone()
        } else {
            self.resource.table.clone()
        };
        self.assemble(&base, &active, &rows, &root_key).await?;
        if let Some(d) = self.diagnostics() {
            self.payload.append_diagnostics(d);
        }
        Ok(Some(self.payload))
    }

    fn apply_search(&self, mut query: SelectQuery<'a>, search: &SearchRequest) -> Result<SelectQuery<'a>, AppError> {
        for (field, value) in &search.filters {
            match owning_label(self.model, self.resource, field)? {
                Some(label) => query = query.filter_eq(label, field, value.clone()),
                None => tracing::debug!(resource = %self.resource.name, field = %field, "ignoring filter on unknown column"),
            }
        }
        for key in &search.sort {
            match owning_label(self.model, self.resource, &key.field)? {
                Some(label) => query = query.order(label, &key.field, key.descending),
                None => {
                    return Err(AppError::BadRequest(format!("cannot sort by unknown column '{}'", key.field)));
                }
            }
        }
        Ok(query)
    }

    async fn assemble(
        &mut self,
        base: &BaseQuery<'a>,
        active: &ActiveRelations<'a>,
        rows: &[Row],
        root_key: &str,
    ) -> Result<(), AppError> {
        self.payload.ensure_table(root_key);
        let batch = self.settings.batch_has_many;
        let mut deferred = DeferredRegistry::new();

        for row in rows {
            let mut record = assembler::extract_base_row(&base.shape, row);
            let mut pending: Vec<(String, Option<Value>)> = Vec::new();
            for entry in active.iter() {
                let rel = entry.relation;
                if rel.custom {
                    self.run_hook(entry, &mut record).await?;
                    continue;
                }
                if entry.merged {
                    continue;
                }
                let referenced = self.model.require(&rel.references)?;
                let local = base.shape.lookup(row, &rel.local_field).cloned();
                match rel.kind {
                    // joined into the base query
                    RelationKind::HasOne => {}
                    RelationKind::BelongsTo => {
                        let records = if base.direct.contains(&entry.key) {
                            let shape = RowShape::new(entry.key.clone(), referenced);
                            assembler::normalize_related(&shape, std::slice::from_ref(row))
                        } else if let Some(value) = local {
                            self.fetch_related(rel, referenced, vec![value])
                                .await?
                                .into_iter()
                                .map(|(_, r)| r)
                                .collect()
                        } else {
                            Vec::new()
                        };
                        assembler::link_into(&mut self.payload, &mut record, rel, referenced, records);
                    }
                    RelationKind::HasMany | RelationKind::HasManyThrough => {
                        if batch {
                            deferred.register(&entry.key, local.as_ref());
                            pending.push((entry.key.clone(), local));
                        } else {
                            let records = match local {
                                Some(value) => self
                                    .fetch_related(rel, referenced, vec![value])
                                    .await?
                                    .into_iter()
                                    .map(|(_, r)| r)
                                    .collect(),
                                None => Vec::new(),
                            };
                            assembler::link_into(&mut self.payload, &mut record, rel, referenced, records);
                        }
                    }
                }
            }
            if let Some(position) = self.payload.push(root_key, record, true) {
                deferred.track(position, pending);
            }
        }

        if !deferred.is_empty() {
            let mut groups = Vec::new();
            for (key, values) in deferred.relations() {
                let Some(entry) = active.get(key) else { continue };
                let referenced = self.model.require(&entry.relation.references)?;
                let mut grouped: HashMap<String, Vec<Record>> = HashMap::new();
                if !values.is_empty() {
                    for (match_value, record) in self.fetch_related(entry.relation, referenced, values.to_vec()).await? {
                        if let Some(v) = match_value {
                            grouped.entry(assembler::group_key(&v)).or_default().push(record);
                        }
                    }
                }
                groups.push((entry.relation, referenced, grouped));
            }
            assembler::reconcile_deferred(&deferred, &mut self.payload, root_key, groups);
        }
        Ok(())
    }

    /// Related records paired with the value they matched on.
    async fn fetch_related(
        &mut self,
        relation: &Relationship,
        referenced: &'a ResourceType,
        mut values: Vec<Value>,
    ) -> Result<Vec<(Option<Value>, Record)>, AppError> {
        let related = related_query(self.model, relation, referenced)?;
        let query = if values.len() == 1 {
            let value = values.remove(0);
            related.query.filter_eq(&related.match_label, &related.match_field, value)
        } else {
            related.query.filter_in(&related.match_label, &related.match_field, values)
        };
        let rows = self.fetch(&query).await?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                let record = assembler::normalize_row(&related.shape, row)?;
                Some((row.value(&related.match_label, &related.match_field).cloned(), record))
            })
            .collect())
    }

    async fn run_hook(&mut self, entry: &ActiveRelation<'a>, record: &mut Record) -> Result<(), AppError> {
        let rel = entry.relation;
        let hooks = self.hooks;
        let hook = hooks
            .get(&hook_key(&rel.owner, rel.key()))
            .ok_or_else(|| ConfigError::MissingHook(hook_key(&rel.owner, rel.key())))?;
        let referenced = self.model.require(&rel.references)?;
        let records: Vec<Record> = hook
            .load(rel, record, self.executor)
            .await?
            .iter()
            .map(|r| assembler::allowed_fields(referenced, r))
            .collect();
        if entry.merged {
            if let Some(first) = records.into_iter().next() {
                assembler::merge_missing(record, first);
            }
        } else {
            assembler::link_into(&mut self.payload, record, rel, referenced, records);
        }
        Ok(())
    }

    async fn fetch(&mut self, query: &SelectQuery<'_>) -> Result<Vec<Row>, AppError> {
        self.queries += 1;
        self.executor.fetch(query).await
    }

    async fn count(&mut self, query: &SelectQuery<'_>) -> Result<u64, AppError> {
        self.queries += 1;
        self.executor.count(query).await
    }

    fn diagnostics(&self) -> Option<Diagnostics> {
        self.settings.diagnostics.then(|| Diagnostics {
            query_count: self.queries,
            elapsed: self.started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve, FullConfig};
    use crate::service::relations::resolve_relations;
    use serde_json::json;

    fn model() -> ResolvedModel {
        let cfg: FullConfig = serde_json::from_value(json!({
            "resources": [
                { "name": "contents", "primary_key": "id",
                  "columns": [{ "name": "id" }, { "name": "title" }, { "name": "author_id" }] },
                { "name": "posts", "primary_key": "id", "parent": "contents",
                  "columns": [{ "name": "id" }, { "name": "body" }] },
                { "name": "users", "primary_key": "id", "columns": [{ "name": "id" }, { "name": "name" }] },
                { "name": "tags", "primary_key": "id", "columns": [{ "name": "id" }, { "name": "label" }] },
                { "name": "post_tags", "primary_key": "id",
                  "columns": [{ "name": "id" }, { "name": "post_id" }, { "name": "tag_id" }] }
            ],
            "relationships": [
                { "resource": "posts", "kind": "belongs_to", "local_field": "id",
                  "references": "users", "referenced_field": "id", "alias": "owner" },
                { "resource": "posts", "kind": "has_many_through", "local_field": "id",
                  "references": "tags", "referenced_field": "id",
                  "through": { "resource": "post_tags", "local_field": "post_id", "referenced_field": "tag_id" } },
                { "resource": "tags", "kind": "belongs_to", "alias": "featured", "local_field": "id",
                  "references": "posts", "referenced_field": "id" }
            ]
        }))
        .unwrap();
        resolve(&cfg).unwrap()
    }

    #[test]
    fn base_query_joins_chain_and_direct_belongs_to() {
        let model = model();
        let posts = model.resource("posts").unwrap();
        let active = resolve_relations(&model, posts, &RelationSelector::All).unwrap();
        let base = base_query(&model, posts, &active).unwrap();
        let labels: Vec<&str> = base.query.labels().map(|(l, _)| l).collect();
        assert_eq!(labels, vec!["posts", "contents", "owner"]);
        assert_eq!(base.direct, vec!["owner".to_string()]);
        assert_eq!(base.shape.merged.len(), 1);
    }

    #[test]
    fn belongs_to_an_inheriting_type_gets_its_own_query() {
        let model = model();
        let tags = model.resource("tags").unwrap();
        let posts = model.resource("posts").unwrap();
        let active = resolve_relations(&model, tags, &RelationSelector::All).unwrap();
        let base = base_query(&model, tags, &active).unwrap();
        assert!(base.direct.is_empty());
        assert_eq!(base.query.labels().count(), 1);

        let related = related_query(&model, &tags.relationships[0], posts).unwrap();
        let labels: Vec<&str> = related.query.labels().map(|(l, _)| l).collect();
        assert_eq!(labels, vec!["posts", "contents"]);
        assert_eq!(related.match_label, "posts");
        assert_eq!(related.match_field, "id");
    }

    #[test]
    fn through_query_starts_at_the_intermediate() {
        let model = model();
        let posts = model.resource("posts").unwrap();
        let tags = model.resource("tags").unwrap();
        let related = related_query(&model, &posts.relationships[1], tags).unwrap();
        assert_eq!(related.query.label, "post_tags");
        assert_eq!(related.match_label, "post_tags");
        assert_eq!(related.match_field, "post_id");
        assert_eq!(related.shape.label, "tags");
    }

    #[test]
    fn filters_resolve_to_the_owning_ancestor() {
        let model = model();
        let posts = model.resource("posts").unwrap();
        assert_eq!(owning_label(&model, posts, "body").unwrap(), Some("posts"));
        assert_eq!(owning_label(&model, posts, "title").unwrap(), Some("contents"));
        assert_eq!(owning_label(&model, posts, "missing").unwrap(), None);
    }
}
