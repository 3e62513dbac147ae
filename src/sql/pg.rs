//! PostgreSQL executor over a sqlx pool.

use crate::error::{AppError, FieldErrors};
use crate::query::{Executor, Record, Row, SelectQuery, WriteStep};
use crate::sql::{builder, PgBindValue, QueryBuf};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgDatabaseError, PgRow};
use sqlx::{PgConnection, PgPool};

#[derive(Clone)]
pub struct PgExecutor {
    pool: PgPool,
}

impl PgExecutor {
    pub fn new(pool: PgPool) -> Self {
        PgExecutor { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn write_one(
        tx: &mut PgConnection,
        step: &WriteStep<'_>,
        written: &[Option<Record>],
    ) -> Result<Option<Record>, AppError> {
        let q = match step {
            WriteStep::Insert { resource, values, link } => {
                let mut values = values.clone();
                if let Some(link) = link {
                    let key = written
                        .get(link.step)
                        .and_then(Option::as_ref)
                        .and_then(|row| row.get(&link.source_field))
                        .cloned()
                        .unwrap_or(Value::Null);
                    values.insert(link.field.clone(), key);
                }
                builder::insert(resource, &values)
            }
            WriteStep::Update { resource, key, values } => builder::update(resource, key, values),
            WriteStep::Delete { resource, key } => builder::delete(resource, key),
        };
        tracing::debug!(sql = %q.sql, params = ?q.params, "query (tx)");
        let row = bind_all(&q)
            .fetch_optional(&mut *tx)
            .await
            .map_err(constraint_to_validation)?;
        Ok(row.map(|r| record_from_row(&r)))
    }
}

fn bind_all(q: &QueryBuf) -> sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments> {
    let mut query = sqlx::query(&q.sql);
    for p in &q.params {
        query = query.bind(PgBindValue::from(p));
    }
    query
}

/// Constraint violations become field-level validation failures; everything else stays a DB error.
fn constraint_to_validation(err: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(db) = &err {
        if let Some(pg) = db.try_downcast_ref::<PgDatabaseError>() {
            let field = pg.column().or(pg.constraint()).unwrap_or("record");
            let message = match pg.code() {
                "23502" => Some(format!("{} is required", field)),
                "23505" => Some(format!("{} must be unique", field)),
                "23514" => Some(format!("{} failed check constraint", field)),
                "23503" => Some(format!("{} references a missing record", field)),
                "22P02" => Some(format!("{} has an invalid value", field)),
                _ => None,
            };
            if let Some(message) = message {
                return AppError::Validation(FieldErrors::single(field, message));
            }
        }
    }
    AppError::Db(err)
}

#[async_trait]
impl Executor for PgExecutor {
    async fn fetch(&self, query: &SelectQuery<'_>) -> Result<Vec<Row>, AppError> {
        let buf = builder::select(query);
        tracing::debug!(sql = %buf.query.sql, params = ?buf.query.params, "query");
        let rows = bind_all(&buf.query).fetch_all(&self.pool).await?;
        let joined = !query.joins.is_empty();
        Ok(rows.iter().map(|r| split_row(r, &buf.layout, joined)).collect())
    }

    async fn count(&self, query: &SelectQuery<'_>) -> Result<u64, AppError> {
        let q = builder::count(query);
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let mut scalar = sqlx::query_scalar::<_, i64>(&q.sql);
        for p in &q.params {
            scalar = scalar.bind(PgBindValue::from(p));
        }
        let n = scalar.fetch_one(&self.pool).await?;
        Ok(n.max(0) as u64)
    }

    async fn write(&self, steps: &[WriteStep<'_>]) -> Result<Vec<Option<Record>>, AppError> {
        let mut tx = self.pool.begin().await?;
        let mut written: Vec<Option<Record>> = Vec::with_capacity(steps.len());
        for step in steps {
            let row = Self::write_one(&mut tx, step, &written).await?;
            written.push(row);
        }
        tx.commit().await?;
        Ok(written)
    }
}

/// Positional columns back into per-label sub-records.
fn split_row(row: &PgRow, layout: &[(String, String)], joined: bool) -> Row {
    if !joined {
        let record = layout
            .iter()
            .enumerate()
            .map(|(i, (_, column))| (column.clone(), cell_to_value(row, i)))
            .collect();
        return Row::Flat(record);
    }
    let mut parts: Vec<(String, Record)> = Vec::new();
    for (i, (label, column)) in layout.iter().enumerate() {
        let value = cell_to_value(row, i);
        match parts.iter_mut().find(|(l, _)| l == label) {
            Some((_, record)) => {
                record.insert(column.clone(), value);
            }
            None => {
                let mut record = Record::new();
                record.insert(column.clone(), value);
                parts.push((label.clone(), record));
            }
        }
    }
    Row::Joined(parts)
}

fn record_from_row(row: &PgRow) -> Record {
    use sqlx::{Column, Row as _};
    row.columns()
        .iter()
        .map(|c| (c.name().to_string(), cell_to_value(row, c.ordinal())))
        .collect()
}

fn cell_to_value(row: &PgRow, index: usize) -> Value {
    use sqlx::Row as _;
    if let Ok(Some(n)) = row.try_get::<Option<i16>, _>(index) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(index) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(index) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f32>, _>(index) {
        if let Some(n) = serde_json::Number::from_f64(n as f64) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(index) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(index) {
        return Value::Bool(b);
    }
    if let Ok(Some(u)) = row.try_get::<Option<uuid::Uuid>, _>(index) {
        return Value::String(u.to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index) {
        return Value::String(d.to_rfc3339());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(index) {
        return Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDate>, _>(index) {
        return Value::String(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(index) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<Value>, _>(index) {
        return j;
    }
    Value::Null
}
