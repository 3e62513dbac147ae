//! In-memory executor: evaluates query descriptions over JSON rows. Used for tests and for
//! running the engine without a database.

use crate::config::{PkType, ResourceType};
use crate::error::{AppError, FieldErrors};
use crate::query::{Executor, Filter, JoinKind, Record, Row, SelectQuery, WriteStep};
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{PoisonError, RwLock};

type Tables = HashMap<String, Vec<Record>>;

#[derive(Default)]
pub struct MemoryExecutor {
    tables: RwLock<Tables>,
    queries: AtomicU64,
}

impl MemoryExecutor {
    pub fn new() -> Self {
        MemoryExecutor::default()
    }

    /// Append rows (JSON objects) to `table`. Non-object values are ignored.
    pub fn seed(&self, table: &str, rows: impl IntoIterator<Item = Value>) {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let target = tables.entry(table.to_string()).or_default();
        target.extend(rows.into_iter().filter_map(|v| match v {
            Value::Object(map) => Some(map),
            _ => None,
        }));
    }

    pub fn rows(&self, table: &str) -> Vec<Record> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables.get(table).cloned().unwrap_or_default()
    }

    /// Number of fetch/count calls served so far.
    pub fn query_count(&self) -> u64 {
        self.queries.load(AtomicOrdering::Relaxed)
    }

    fn matching(&self, query: &SelectQuery<'_>) -> Vec<Vec<(String, Record)>> {
        self.queries.fetch_add(1, AtomicOrdering::Relaxed);
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        let empty = Vec::new();
        let table = |r: &ResourceType| tables.get(&r.table).unwrap_or(&empty);

        let mut combos: Vec<Vec<(String, Record)>> = table(query.source)
            .iter()
            .map(|raw| vec![(query.label.clone(), project(query.source, raw))])
            .collect();

        for join in &query.joins {
            let mut next = Vec::with_capacity(combos.len());
            for combo in combos {
                let left = lookup(&combo, &join.left_label, &join.left_field).cloned();
                let matches: Vec<Record> = match &left {
                    Some(key) => table(join.resource)
                        .iter()
                        .filter(|raw| raw.get(&join.right_field).is_some_and(|v| values_equal(v, key)))
                        .map(|raw| project(join.resource, raw))
                        .collect(),
                    None => Vec::new(),
                };
                if matches.is_empty() {
                    if join.kind == JoinKind::Left {
                        let mut extended = combo.clone();
                        extended.push((join.label.clone(), project(join.resource, &Record::new())));
                        next.push(extended);
                    }
                    continue;
                }
                for m in matches {
                    let mut extended = combo.clone();
                    extended.push((join.label.clone(), m));
                    next.push(extended);
                }
            }
            combos = next;
        }

        combos.retain(|combo| query.filters.iter().all(|f| filter_matches(combo, f)));
        combos
    }
}

/// Every column of `resource`, missing ones as null.
fn project(resource: &ResourceType, raw: &Record) -> Record {
    resource
        .columns
        .iter()
        .map(|c| (c.name.clone(), raw.get(&c.name).cloned().unwrap_or(Value::Null)))
        .collect()
}

fn lookup<'r>(combo: &'r [(String, Record)], label: &str, field: &str) -> Option<&'r Value> {
    combo
        .iter()
        .find(|(l, _)| l == label)
        .and_then(|(_, r)| r.get(field))
        .filter(|v| !v.is_null())
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn filter_matches(combo: &[(String, Record)], filter: &Filter) -> bool {
    match filter {
        Filter::Eq { label, field, value } => match lookup(combo, label, field) {
            Some(v) => values_equal(v, value),
            None => value.is_null(),
        },
        Filter::In { label, field, values } => {
            lookup(combo, label, field).is_some_and(|v| values.iter().any(|candidate| values_equal(v, candidate)))
        }
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        // Nulls sort last, as PostgreSQL does for ascending order.
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            x.as_f64().partial_cmp(&y.as_f64()).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

fn sort_and_page(query: &SelectQuery<'_>, combos: &mut Vec<Vec<(String, Record)>>) {
    let default_order = [(query.label.clone(), query.source.primary_key.clone(), false)];
    let order: Vec<(String, String, bool)> = if query.order_by.is_empty() {
        default_order.to_vec()
    } else {
        query
            .order_by
            .iter()
            .map(|o| (o.label.clone(), o.field.clone(), o.descending))
            .collect()
    };
    combos.sort_by(|a, b| {
        for (label, field, descending) in &order {
            let ord = compare_values(lookup(a, label, field), lookup(b, label, field));
            let ord = if *descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
    let offset = query.offset.unwrap_or(0) as usize;
    let kept: Vec<_> = combos
        .drain(..)
        .skip(offset)
        .take(query.limit.map(|n| n as usize).unwrap_or(usize::MAX))
        .collect();
    *combos = kept;
}

fn find_by_key<'t>(rows: &'t mut [Record], resource: &ResourceType, key: &Value) -> Option<&'t mut Record> {
    rows.iter_mut()
        .find(|r| r.get(&resource.primary_key).is_some_and(|v| values_equal(v, key)))
}

fn next_key(resource: &ResourceType, rows: &[Record]) -> Value {
    if resource.pk_type == PkType::Uuid {
        return Value::String(uuid::Uuid::new_v4().to_string());
    }
    let max = rows
        .iter()
        .filter_map(|r| r.get(&resource.primary_key).and_then(Value::as_i64))
        .max()
        .unwrap_or(0);
    Value::from(max + 1)
}

fn check_required(resource: &ResourceType, record: &Record, only_present: Option<&Record>) -> FieldErrors {
    let mut errors = FieldErrors::new();
    for column in &resource.columns {
        if column.nullable || column.has_default {
            continue;
        }
        if let Some(present) = only_present {
            if !present.contains_key(&column.name) {
                continue;
            }
        }
        if record.get(&column.name).map_or(true, Value::is_null) {
            errors.add(&column.name, format!("{} is required", column.name));
        }
    }
    errors
}

fn apply_step(tables: &mut Tables, step: &WriteStep<'_>, written: &[Option<Record>]) -> Result<Option<Record>, AppError> {
    match step {
        WriteStep::Insert { resource, values, link } => {
            let rows = tables.entry(resource.table.clone()).or_default();
            let mut record = project(resource, values);
            if let Some(link) = link {
                let key = written
                    .get(link.step)
                    .and_then(Option::as_ref)
                    .and_then(|r| r.get(&link.source_field))
                    .cloned()
                    .unwrap_or(Value::Null);
                record.insert(link.field.clone(), key);
            }
            let pk_default = resource.column(&resource.primary_key).is_some_and(|c| c.has_default);
            if record.get(&resource.primary_key).map_or(true, Value::is_null) && pk_default {
                record.insert(resource.primary_key.clone(), next_key(resource, rows));
            }
            check_required(resource, &record, None).into_result()?;
            if let Some(key) = record.get(&resource.primary_key).filter(|v| !v.is_null()) {
                if find_by_key(rows, resource, key).is_some() {
                    let message = format!("{} must be unique", resource.primary_key);
                    return Err(AppError::Validation(FieldErrors::single(&resource.primary_key, message)));
                }
            }
            rows.push(record.clone());
            Ok(Some(record))
        }
        WriteStep::Update { resource, key, values } => {
            let rows = tables.entry(resource.table.clone()).or_default();
            let Some(row) = find_by_key(rows, resource, key) else {
                return Ok(None);
            };
            let mut updated = row.clone();
            for column in &resource.columns {
                if column.name == resource.primary_key {
                    continue;
                }
                if let Some(v) = values.get(&column.name) {
                    updated.insert(column.name.clone(), v.clone());
                }
            }
            check_required(resource, &updated, Some(values)).into_result()?;
            *row = updated.clone();
            Ok(Some(updated))
        }
        WriteStep::Delete { resource, key } => {
            let rows = tables.entry(resource.table.clone()).or_default();
            let position = rows
                .iter()
                .position(|r| r.get(&resource.primary_key).is_some_and(|v| values_equal(v, key)));
            Ok(position.map(|i| rows.remove(i)))
        }
    }
}

#[async_trait]
impl Executor for MemoryExecutor {
    async fn fetch(&self, query: &SelectQuery<'_>) -> Result<Vec<Row>, AppError> {
        let mut combos = self.matching(query);
        sort_and_page(query, &mut combos);
        tracing::debug!(source = %query.label, joins = query.joins.len(), rows = combos.len(), "memory query");
        let joined = !query.joins.is_empty();
        Ok(combos
            .into_iter()
            .map(|mut combo| {
                if joined {
                    Row::Joined(combo)
                } else {
                    Row::Flat(combo.pop().map(|(_, r)| r).unwrap_or_default())
                }
            })
            .collect())
    }

    async fn count(&self, query: &SelectQuery<'_>) -> Result<u64, AppError> {
        Ok(self.matching(query).len() as u64)
    }

    async fn write(&self, steps: &[WriteStep<'_>]) -> Result<Vec<Option<Record>>, AppError> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let mut staged = tables.clone();
        let mut written = Vec::with_capacity(steps.len());
        for step in steps {
            let row = apply_step(&mut staged, step, &written)?;
            written.push(row);
        }
        *tables = staged;
        Ok(written)
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
                { "name": "posts", "primary_key": "id",
                  "columns": [{ "name": "id", "nullable": false, "default": "serial" },
                              { "name": "title", "nullable": false }] },
                { "name": "comments", "primary_key": "id",
                  "columns": [{ "name": "id" }, { "name": "post_id" }, { "name": "text" }] }
            ]
        }))
        .unwrap();
        resolve(&cfg).unwrap()
    }

    #[tokio::test]
    async fn left_join_keeps_unmatched_rows_with_null_parts() {
        let model = model();
        let db = MemoryExecutor::new();
        db.seed("posts", vec![json!({ "id": 1, "title": "a" }), json!({ "id": 2, "title": "b" })]);
        db.seed("comments", vec![json!({ "id": 7, "post_id": 1, "text": "hi" })]);
        let posts = model.resource("posts").unwrap();
        let comments = model.resource("comments").unwrap();
        let query = SelectQuery::from(posts, "posts").join(JoinKind::Left, comments, "c", ("posts", "id"), "post_id");

        let rows = db.fetch(&query).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].value("c", "id"), Some(&json!(7)));
        assert_eq!(rows[1].value("c", "id"), None);
        assert_eq!(db.count(&query).await.unwrap(), 2);
        assert_eq!(db.query_count(), 2);
    }

    #[tokio::test]
    async fn failed_batch_leaves_tables_untouched() {
        let model = model();
        let db = MemoryExecutor::new();
        let posts = model.resource("posts").unwrap();
        let ok = WriteStep::Insert {
            resource: posts,
            values: json!({ "title": "kept?" }).as_object().cloned().unwrap(),
            link: None,
        };
        let bad = WriteStep::Insert {
            resource: posts,
            values: Record::new(),
            link: None,
        };
        let err = db.write(&[ok, bad]).await.unwrap_err();
        match err {
            AppError::Validation(fields) => assert!(fields.get("title").is_some()),
            other => panic!("unexpected error: {}", other),
        }
        assert!(db.rows("posts").is_empty());
    }

    #[tokio::test]
    async fn insert_assigns_serial_keys() {
        let model = model();
        let db = MemoryExecutor::new();
        db.seed("posts", vec![json!({ "id": 4, "title": "old" })]);
        let posts = model.resource("posts").unwrap();
        let written = db
            .write(&[WriteStep::Insert {
                resource: posts,
                values: json!({ "title": "new" }).as_object().cloned().unwrap(),
                link: None,
            }])
            .await
            .unwrap();
        assert_eq!(written[0].as_ref().and_then(|r| r.get("id")), Some(&json!(5)));
    }
}
