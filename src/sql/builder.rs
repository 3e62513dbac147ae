//! Builds parameterized SELECT / COUNT / INSERT / UPDATE / DELETE from query descriptions.

use crate::config::{ColumnInfo, ResourceType};
use crate::query::{Filter, JoinKind, Record, SelectQuery};
use serde_json::Value;

/// Quote identifier for PostgreSQL (safe: identifiers only come from config).
fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

fn qualified_table(resource: &ResourceType) -> String {
    format!("{}.{}", quoted(&resource.schema_name), quoted(&resource.table))
}

pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push_param(&mut self, v: Value) -> usize {
        self.params.push(v);
        self.params.len()
    }
}

/// A SELECT plus the (label, column) behind each positional output column.
pub struct SelectBuf {
    pub query: QueryBuf,
    pub layout: Vec<(String, String)>,
}

/// Type to cast a bound parameter to, when the column type is usable in a cast.
fn cast_type(column: Option<&ColumnInfo>) -> Option<&str> {
    column
        .and_then(|c| c.pg_type.as_deref())
        .filter(|t| !t.eq_ignore_ascii_case("array") && !t.eq_ignore_ascii_case("user-defined"))
}

fn placeholder(n: usize, column: Option<&ColumnInfo>) -> String {
    match cast_type(column) {
        Some(t) => format!("${}::{}", n, t),
        None => format!("${}", n),
    }
}

/// Custom enums (schema.typename) and numeric come back as text so they decode to strings.
fn text_cast(column: &ColumnInfo) -> &'static str {
    let pg_type = column.pg_type.as_deref().unwrap_or("");
    if pg_type.contains('.') || pg_type.eq_ignore_ascii_case("numeric") {
        "::text"
    } else {
        ""
    }
}

fn column_expr(label: &str, column: &ColumnInfo) -> String {
    format!("{}.{}{}", quoted(label), quoted(&column.name), text_cast(column))
}

fn from_clause(query: &SelectQuery<'_>) -> String {
    let mut sql = format!("{} {}", qualified_table(query.source), quoted(&query.label));
    for join in &query.joins {
        let kind = match join.kind {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
        };
        sql.push_str(&format!(
            " {} {} {} ON {}.{} = {}.{}",
            kind,
            qualified_table(join.resource),
            quoted(&join.label),
            quoted(&join.left_label),
            quoted(&join.left_field),
            quoted(&join.label),
            quoted(&join.right_field)
        ));
    }
    sql
}

fn where_clause(query: &SelectQuery<'_>, q: &mut QueryBuf) -> String {
    let mut parts = Vec::new();
    for filter in &query.filters {
        match filter {
            Filter::Eq { label, field, value } => {
                let column = query.resource_for(label).and_then(|r| r.column(field));
                let target = format!("{}.{}", quoted(label), quoted(field));
                if value.is_null() {
                    parts.push(format!("{} IS NULL", target));
                } else {
                    let n = q.push_param(value.clone());
                    parts.push(format!("{} = {}", target, placeholder(n, column)));
                }
            }
            Filter::In { label, field, values } => {
                if values.is_empty() {
                    parts.push("1 = 0".to_string());
                    continue;
                }
                let column = query.resource_for(label).and_then(|r| r.column(field));
                let placeholders: Vec<String> = values
                    .iter()
                    .map(|v| placeholder(q.push_param(v.clone()), column))
                    .collect();
                parts.push(format!(
                    "{}.{} IN ({})",
                    quoted(label),
                    quoted(field),
                    placeholders.join(", ")
                ));
            }
        }
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", parts.join(" AND "))
    }
}

/// SELECT every column of every labelled source, aliased positionally (c0, c1, ...).
pub fn select(query: &SelectQuery<'_>) -> SelectBuf {
    let mut q = QueryBuf::new();
    let mut layout = Vec::new();
    let mut exprs = Vec::new();
    for (label, resource) in query.labels() {
        for column in &resource.columns {
            exprs.push(format!("{} AS {}", column_expr(label, column), quoted(&format!("c{}", layout.len()))));
            layout.push((label.to_string(), column.name.clone()));
        }
    }
    let from = from_clause(query);
    let where_sql = where_clause(query, &mut q);
    let order_sql = if query.order_by.is_empty() {
        format!(" ORDER BY {}.{}", quoted(&query.label), quoted(&query.source.primary_key))
    } else {
        let keys: Vec<String> = query
            .order_by
            .iter()
            .map(|o| {
                format!(
                    "{}.{}{}",
                    quoted(&o.label),
                    quoted(&o.field),
                    if o.descending { " DESC" } else { "" }
                )
            })
            .collect();
        format!(" ORDER BY {}", keys.join(", "))
    };
    let limit_sql = query.limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    let offset_sql = query.offset.map(|n| format!(" OFFSET {}", n)).unwrap_or_default();
    q.sql = format!(
        "SELECT {} FROM {}{}{}{}{}",
        exprs.join(", "),
        from,
        where_sql,
        order_sql,
        limit_sql,
        offset_sql
    );
    SelectBuf { query: q, layout }
}

/// COUNT(*) over the same joins and filters; ordering and paging are ignored.
pub fn count(query: &SelectQuery<'_>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let from = from_clause(query);
    let where_sql = where_clause(query, &mut q);
    q.sql = format!("SELECT COUNT(*) FROM {}{}", from, where_sql);
    q
}

fn returning_list(resource: &ResourceType) -> String {
    resource
        .columns
        .iter()
        .map(|c| format!("{}{} AS {}", quoted(&c.name), text_cast(c), quoted(&c.name)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// INSERT the given values; columns unknown to the resource are ignored. Omitted columns take
/// their DB default.
pub fn insert(resource: &ResourceType, values: &Record) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = qualified_table(resource);
    let mut cols = Vec::new();
    let mut placeholders = Vec::new();
    for column in &resource.columns {
        let Some(value) = values.get(&column.name) else { continue };
        let n = q.push_param(value.clone());
        cols.push(quoted(&column.name));
        placeholders.push(placeholder(n, Some(column)));
    }
    let returning = returning_list(resource);
    q.sql = if cols.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES RETURNING {}", table, returning)
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            table,
            cols.join(", "),
            placeholders.join(", "),
            returning
        )
    };
    q
}

/// UPDATE by primary key: SET only known, non-key columns. With nothing to set, selects the row.
pub fn update(resource: &ResourceType, key: &Value, values: &Record) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = qualified_table(resource);
    let pk = resource.column(&resource.primary_key);
    let mut sets = Vec::new();
    for column in &resource.columns {
        if column.name == resource.primary_key {
            continue;
        }
        let Some(value) = values.get(&column.name) else { continue };
        let n = q.push_param(value.clone());
        sets.push(format!("{} = {}", quoted(&column.name), placeholder(n, Some(column))));
    }
    let returning = returning_list(resource);
    let id_param = q.push_param(key.clone());
    q.sql = if sets.is_empty() {
        format!(
            "SELECT {} FROM {} WHERE {} = {}",
            returning,
            table,
            quoted(&resource.primary_key),
            placeholder(id_param, pk)
        )
    } else {
        format!(
            "UPDATE {} SET {} WHERE {} = {} RETURNING {}",
            table,
            sets.join(", "),
            quoted(&resource.primary_key),
            placeholder(id_param, pk),
            returning
        )
    };
    q
}

/// DELETE by primary key.
pub fn delete(resource: &ResourceType, key: &Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    let pk = resource.column(&resource.primary_key);
    let n = q.push_param(key.clone());
    q.sql = format!(
        "DELETE FROM {} WHERE {} = {} RETURNING {}",
        qualified_table(resource),
        quoted(&resource.primary_key),
        placeholder(n, pk),
        returning_list(resource)
    );
    q
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve, FullConfig};
    use crate::query::JoinKind;
    use serde_json::json;

    fn model() -> crate::config::ResolvedModel {
        let cfg: FullConfig = serde_json::from_value(json!({
            "resources": [
                { "name": "contents", "primary_key": "id",
                  "columns": [{ "name": "id", "type": "bigint" }, { "name": "title" }] },
                { "name": "posts", "primary_key": "id", "parent": "contents",
                  "columns": [{ "name": "id", "type": "bigint" }, { "name": "body" }] }
            ]
        }))
        .unwrap();
        resolve(&cfg).unwrap()
    }

    #[test]
    fn select_aliases_columns_positionally() {
        let model = model();
        let posts = model.resource("posts").unwrap();
        let contents = model.resource("contents").unwrap();
        let query = SelectQuery::from(posts, "posts")
            .join(JoinKind::Inner, contents, "contents", ("posts", "id"), "id")
            .filter_eq("posts", "id", json!(10));
        let buf = select(&query);
        assert_eq!(
            buf.query.sql,
            "SELECT \"posts\".\"id\" AS \"c0\", \"posts\".\"body\" AS \"c1\", \
             \"contents\".\"id\" AS \"c2\", \"contents\".\"title\" AS \"c3\" \
             FROM \"public\".\"posts\" \"posts\" \
             INNER JOIN \"public\".\"contents\" \"contents\" ON \"posts\".\"id\" = \"contents\".\"id\" \
             WHERE \"posts\".\"id\" = $1::bigint ORDER BY \"posts\".\"id\""
        );
        assert_eq!(buf.query.params, vec![json!(10)]);
        assert_eq!(buf.layout[3], ("contents".to_string(), "title".to_string()));
    }

    #[test]
    fn empty_in_filter_matches_nothing() {
        let model = model();
        let posts = model.resource("posts").unwrap();
        let query = SelectQuery::from(posts, "posts").filter_in("posts", "id", vec![]);
        assert!(count(&query).sql.ends_with("WHERE 1 = 0"));
    }

    #[test]
    fn update_without_values_reads_the_row() {
        let model = model();
        let posts = model.resource("posts").unwrap();
        let q = update(posts, &json!(3), &Record::new());
        assert!(q.sql.starts_with("SELECT"));
        assert_eq!(q.params, vec![json!(3)]);
    }
}
