//! Write pipeline: split a submitted record along its parent chain and persist every level in
//! one atomic batch.

use super::assembler::RowShape;
use super::finder::join_parent_chain;
use super::validation::RequestValidator;
use crate::config::{ResolvedModel, ResourceType};
use crate::error::{AppError, ConfigError, FieldErrors};
use crate::query::{Executor, KeyLink, Record, Row, SelectQuery, WriteStep};
use serde_json::Value;

#[derive(Clone, Debug, PartialEq)]
pub enum SaveMode {
    Insert,
    /// Update of the record with this primary key.
    Update(Value),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Insert,
    Update,
    Persisting,
    Done,
    Failed,
}

/// One level of a decomposed record. The root ancestor is outermost; each level holds the
/// level of its direct child type.
#[derive(Clone, Debug)]
pub struct ModelChain<'a> {
    pub resource: &'a ResourceType,
    /// Existing row key (updates only).
    pub key: Option<Value>,
    pub values: Record,
    pub child: Option<Box<ModelChain<'a>>>,
}

impl<'a> ModelChain<'a> {
    /// Direct child level, by child type name.
    pub fn child(&self, name: &str) -> Option<&ModelChain<'a>> {
        self.child.as_deref().filter(|c| c.resource.name == name)
    }

    /// Root first.
    pub fn levels(&self) -> Vec<&ModelChain<'a>> {
        let mut levels = vec![self];
        let mut current = self;
        while let Some(child) = current.child.as_deref() {
            levels.push(child);
            current = child;
        }
        levels
    }

    fn attach(&mut self, leaf: ModelChain<'a>) {
        match &mut self.child {
            Some(child) => child.attach(leaf),
            None => self.child = Some(Box::new(leaf)),
        }
    }
}

/// Submitted values for the columns of `resource`.
pub fn hydrate(resource: &ResourceType, attributes: &Record) -> Record {
    resource
        .columns
        .iter()
        .filter_map(|c| attributes.get(&c.name).map(|v| (c.name.clone(), v.clone())))
        .collect()
}

/// Decompose `attributes` into one level per type in `resource`'s lineage. With `existing`
/// (a row loaded with the parent chain joined), each level also carries its stored key.
pub fn build_chain<'a>(
    model: &'a ResolvedModel,
    resource: &'a ResourceType,
    attributes: &Record,
    existing: Option<&Row>,
) -> Result<ModelChain<'a>, ConfigError> {
    model.parent_chain(&resource.name)?;
    build_level(model, resource, attributes, existing)
}

fn build_level<'a>(
    model: &'a ResolvedModel,
    resource: &'a ResourceType,
    attributes: &Record,
    existing: Option<&Row>,
) -> Result<ModelChain<'a>, ConfigError> {
    let level = ModelChain {
        resource,
        key: existing
            .and_then(|row| row.value(&resource.name, &resource.primary_key))
            .cloned(),
        values: hydrate(resource, attributes),
        child: None,
    };
    match &resource.parent {
        None => Ok(level),
        Some(link) => {
            let parent = model.require(&link.resource)?;
            let mut root = build_level(model, parent, attributes, existing)?;
            root.attach(level);
            Ok(root)
        }
    }
}

/// Root-to-leaf inserts; each child copies its link field from its parent's written row.
pub fn insert_steps<'a>(chain: &ModelChain<'a>) -> Vec<WriteStep<'a>> {
    chain
        .levels()
        .into_iter()
        .enumerate()
        .map(|(i, level)| WriteStep::Insert {
            resource: level.resource,
            values: level.values.clone(),
            link: match &level.resource.parent {
                Some(link) if i > 0 => Some(KeyLink {
                    field: link.local_field.clone(),
                    step: i - 1,
                    source_field: link.referenced_field.clone(),
                }),
                _ => None,
            },
        })
        .collect()
}

/// Per-level updates, skipping levels with nothing to change. Keys and link fields stay put.
pub fn update_steps<'a>(chain: &ModelChain<'a>) -> Result<Vec<WriteStep<'a>>, AppError> {
    let mut steps = Vec::new();
    for level in chain.levels() {
        let resource = level.resource;
        let mut values = level.values.clone();
        values.remove(&resource.primary_key);
        if let Some(link) = &resource.parent {
            values.remove(&link.local_field);
        }
        if values.is_empty() {
            continue;
        }
        let key = level
            .key
            .clone()
            .ok_or_else(|| AppError::NotFound(format!("{} row for update", resource.name)))?;
        steps.push(WriteStep::Update { resource, key, values });
    }
    Ok(steps)
}

fn validate_levels(chain: &ModelChain<'_>, mode: &SaveMode) -> Result<(), AppError> {
    let mut errors = FieldErrors::new();
    for level in chain.levels() {
        let resource = level.resource;
        match mode {
            SaveMode::Insert => {
                let supplied: Vec<&str> = resource.parent.iter().map(|l| l.local_field.as_str()).collect();
                RequestValidator::required_columns(resource, &level.values, &supplied, &mut errors);
                RequestValidator::validate(&level.values, &resource.validation, &mut errors);
            }
            SaveMode::Update(_) => {
                RequestValidator::non_null_columns(resource, &level.values, &mut errors);
                RequestValidator::validate_partial(&level.values, &resource.validation, &mut errors);
            }
        }
    }
    errors.into_result()
}

fn attributes_of(data: &Value) -> Result<&Record, AppError> {
    data.get("attributes")
        .and_then(Value::as_object)
        .ok_or_else(|| AppError::BadRequest("body must carry an \"attributes\" object".into()))
}

/// Load the row for `id` with every ancestor joined.
pub async fn load_chain_row(
    model: &ResolvedModel,
    resource: &ResourceType,
    executor: &dyn Executor,
    id: &Value,
) -> Result<Option<Row>, AppError> {
    let label = resource.name.as_str();
    let mut shape = RowShape::new(label, resource);
    let mut query = join_parent_chain(model, SelectQuery::from(resource, label), resource, label, &mut shape)?
        .filter_eq(label, &resource.primary_key, id.clone());
    query.limit = Some(1);
    Ok(executor.fetch(&query).await?.into_iter().next())
}

/// Save pipeline for one resource: `Idle -> Insert | Update -> Persisting -> Done | Failed`.
pub struct SavePipeline<'a> {
    model: &'a ResolvedModel,
    resource: &'a ResourceType,
    executor: &'a dyn Executor,
    state: PipelineState,
}

impl<'a> SavePipeline<'a> {
    pub fn new(model: &'a ResolvedModel, resource: &'a ResourceType, executor: &'a dyn Executor) -> Self {
        SavePipeline {
            model,
            resource,
            executor,
            state: PipelineState::Idle,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Insert when `id` is `None`, else update. Returns the primary key of the saved record.
    pub async fn save(&mut self, data: &Value, id: Option<Value>) -> Result<Value, AppError> {
        let mode = match id {
            Some(id) => SaveMode::Update(id),
            None => SaveMode::Insert,
        };
        let result = self.run(data, mode).await;
        self.state = match &result {
            Ok(_) => PipelineState::Done,
            Err(e) => {
                tracing::debug!(resource = %self.resource.name, error = %e, "save failed");
                PipelineState::Failed
            }
        };
        result
    }

    async fn run(&mut self, data: &Value, mode: SaveMode) -> Result<Value, AppError> {
        let attributes = attributes_of(data)?;
        match &mode {
            SaveMode::Insert => {
                self.state = PipelineState::Insert;
                let chain = build_chain(self.model, self.resource, attributes, None)?;
                validate_levels(&chain, &mode)?;
                self.state = PipelineState::Persisting;
                let steps = insert_steps(&chain);
                let written = self.executor.write(&steps).await?;
                let key = written
                    .last()
                    .and_then(Option::as_ref)
                    .and_then(|r| r.get(&self.resource.primary_key))
                    .filter(|v| !v.is_null())
                    .cloned()
                    .ok_or(AppError::Db(sqlx::Error::RowNotFound))?;
                tracing::info!(resource = %self.resource.name, levels = steps.len(), "record inserted");
                Ok(key)
            }
            SaveMode::Update(id) => {
                self.state = PipelineState::Update;
                let existing = load_chain_row(self.model, self.resource, self.executor, id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("{} {}", self.resource.name, id)))?;
                let chain = build_chain(self.model, self.resource, attributes, Some(&existing))?;
                validate_levels(&chain, &mode)?;
                self.state = PipelineState::Persisting;
                let steps = update_steps(&chain)?;
                if !steps.is_empty() {
                    let written = self.executor.write(&steps).await?;
                    if written.iter().any(Option::is_none) {
                        return Err(AppError::NotFound(format!("{} {}", self.resource.name, id)));
                    }
                }
                tracing::info!(resource = %self.resource.name, levels = steps.len(), "record updated");
                Ok(id.clone())
            }
        }
    }
}

/// Delete the record and every ancestor row, leaf first, in one batch.
pub async fn delete_chain(
    model: &ResolvedModel,
    resource: &ResourceType,
    executor: &dyn Executor,
    id: &Value,
) -> Result<(), AppError> {
    let not_found = || AppError::NotFound(format!("{} {}", resource.name, id));
    let existing = load_chain_row(model, resource, executor, id).await?.ok_or_else(not_found)?;
    let mut steps = Vec::new();
    for level in std::iter::once(resource).chain(model.parent_chain(&resource.name)?) {
        let key = existing
            .value(&level.name, &level.primary_key)
            .cloned()
            .ok_or_else(not_found)?;
        steps.push(WriteStep::Delete { resource: level, key });
    }
    let written = executor.write(&steps).await?;
    if written.first().map_or(true, Option::is_none) {
        return Err(not_found());
    }
    tracing::info!(resource = %resource.name, levels = steps.len(), "record deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve, FullConfig};
    use serde_json::json;

    fn model() -> ResolvedModel {
        let cfg: FullConfig = serde_json::from_value(json!({
            "resources": [
                { "name": "nodes", "primary_key": "id",
                  "columns": [{ "name": "id", "nullable": false, "default": "nextval" }, { "name": "kind" }] },
                { "name": "contents", "primary_key": "id", "parent": "nodes",
                  "columns": [{ "name": "id", "nullable": false }, { "name": "title", "nullable": false }] },
                { "name": "posts", "primary_key": "id", "parent": "contents",
                  "columns": [{ "name": "id", "nullable": false }, { "name": "body" }] }
            ]
        }))
        .unwrap();
        resolve(&cfg).unwrap()
    }

    fn attrs(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn chain_nests_root_outermost() {
        let model = model();
        let posts = model.resource("posts").unwrap();
        let chain = build_chain(&model, posts, &attrs(json!({ "kind": "post", "title": "t", "body": "b" })), None).unwrap();
        assert_eq!(chain.resource.name, "nodes");
        let contents = chain.child("contents").unwrap();
        assert_eq!(contents.values, attrs(json!({ "title": "t" })));
        assert_eq!(contents.child("posts").unwrap().values, attrs(json!({ "body": "b" })));
        assert_eq!(chain.levels().len(), 3);
    }

    #[test]
    fn inserts_link_each_child_to_its_parent() {
        let model = model();
        let posts = model.resource("posts").unwrap();
        let chain = build_chain(&model, posts, &attrs(json!({ "title": "t" })), None).unwrap();
        let steps = insert_steps(&chain);
        assert_eq!(steps.len(), 3);
        match &steps[2] {
            WriteStep::Insert { resource, link, .. } => {
                assert_eq!(resource.name, "posts");
                assert_eq!(
                    link,
                    &Some(KeyLink { field: "id".into(), step: 1, source_field: "id".into() })
                );
            }
            other => panic!("unexpected step {:?}", other.resource().name),
        }
    }

    #[test]
    fn missing_required_column_is_a_validation_failure() {
        let model = model();
        let posts = model.resource("posts").unwrap();
        let chain = build_chain(&model, posts, &attrs(json!({ "body": "b" })), None).unwrap();
        match validate_levels(&chain, &SaveMode::Insert) {
            Err(AppError::Validation(errors)) => {
                assert!(errors.get("title").is_some());
                assert!(errors.get("id").is_none());
            }
            other => panic!("expected validation error, got {:?}", other.err()),
        }
    }

    #[test]
    fn update_skips_untouched_levels_and_keys() {
        let model = model();
        let posts = model.resource("posts").unwrap();
        let existing = Row::Joined(vec![
            ("posts".into(), attrs(json!({ "id": 7, "body": "old" }))),
            ("contents".into(), attrs(json!({ "id": 7, "title": "old" }))),
            ("nodes".into(), attrs(json!({ "id": 7, "kind": "post" }))),
        ]);
        let chain = build_chain(&model, posts, &attrs(json!({ "id": 7, "body": "new" })), Some(&existing)).unwrap();
        let steps = update_steps(&chain).unwrap();
        assert_eq!(steps.len(), 1);
        match &steps[0] {
            WriteStep::Update { resource, key, values } => {
                assert_eq!(resource.name, "posts");
                assert_eq!(key, &json!(7));
                assert_eq!(values, &attrs(json!({ "body": "new" })));
            }
            other => panic!("unexpected step {:?}", other.resource().name),
        }
    }

    #[test]
    fn missing_envelope_is_rejected() {
        assert!(matches!(attributes_of(&json!({ "title": "x" })), Err(AppError::BadRequest(_))));
    }
}
