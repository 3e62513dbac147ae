//! Declarative query and write descriptions handed to an [`Executor`].
//!
//! Every source in a query carries a label. Labels are unique within one query and name the
//! sub-records of a [`Row::Joined`] result, so two joins against the same table stay apart.

mod executor;

pub use executor::Executor;

use crate::config::ResourceType;
use serde_json::{Map, Value};

/// A flat field map: one record as it appears in the payload.
pub type Record = Map<String, Value>;

/// One result row. Queries without joins yield `Flat`; joined queries yield one sub-record per
/// label, in source-then-join order. Outer-joined misses carry all-null sub-records.
#[derive(Clone, Debug, PartialEq)]
pub enum Row {
    Flat(Record),
    Joined(Vec<(String, Record)>),
}

impl Row {
    /// Sub-record for `label`. A flat row answers for any label.
    pub fn part(&self, label: &str) -> Option<&Record> {
        match self {
            Row::Flat(record) => Some(record),
            Row::Joined(parts) => parts.iter().find(|(l, _)| l == label).map(|(_, r)| r),
        }
    }

    /// Non-null value of `field` on the `label` sub-record.
    pub fn value(&self, label: &str, field: &str) -> Option<&Value> {
        self.part(label).and_then(|r| r.get(field)).filter(|v| !v.is_null())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

/// `JOIN resource AS label ON left_label.left_field = label.right_field`.
#[derive(Clone, Debug)]
pub struct Join<'a> {
    pub kind: JoinKind,
    pub resource: &'a ResourceType,
    pub label: String,
    pub left_label: String,
    pub left_field: String,
    pub right_field: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    Eq { label: String, field: String, value: Value },
    In { label: String, field: String, values: Vec<Value> },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderBy {
    pub label: String,
    pub field: String,
    pub descending: bool,
}

/// Projection is every column of every labelled source; access policy is applied afterwards.
#[derive(Clone, Debug)]
pub struct SelectQuery<'a> {
    pub source: &'a ResourceType,
    pub label: String,
    pub joins: Vec<Join<'a>>,
    pub filters: Vec<Filter>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl<'a> SelectQuery<'a> {
    pub fn from(source: &'a ResourceType, label: impl Into<String>) -> Self {
        SelectQuery {
            source,
            label: label.into(),
            joins: Vec::new(),
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn join(
        mut self,
        kind: JoinKind,
        resource: &'a ResourceType,
        label: impl Into<String>,
        left: (&str, &str),
        right_field: &str,
    ) -> Self {
        self.joins.push(Join {
            kind,
            resource,
            label: label.into(),
            left_label: left.0.to_string(),
            left_field: left.1.to_string(),
            right_field: right_field.to_string(),
        });
        self
    }

    pub fn filter_eq(mut self, label: &str, field: &str, value: Value) -> Self {
        self.filters.push(Filter::Eq {
            label: label.to_string(),
            field: field.to_string(),
            value,
        });
        self
    }

    pub fn filter_in(mut self, label: &str, field: &str, values: Vec<Value>) -> Self {
        self.filters.push(Filter::In {
            label: label.to_string(),
            field: field.to_string(),
            values,
        });
        self
    }

    pub fn order(mut self, label: &str, field: &str, descending: bool) -> Self {
        self.order_by.push(OrderBy {
            label: label.to_string(),
            field: field.to_string(),
            descending,
        });
        self
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.label == label || self.joins.iter().any(|j| j.label == label)
    }

    /// Resource behind `label`.
    pub fn resource_for(&self, label: &str) -> Option<&'a ResourceType> {
        if self.label == label {
            return Some(self.source);
        }
        self.joins.iter().find(|j| j.label == label).map(|j| j.resource)
    }

    /// Labels in projection order.
    pub fn labels(&self) -> impl Iterator<Item = (&str, &'a ResourceType)> {
        std::iter::once((self.label.as_str(), self.source))
            .chain(self.joins.iter().map(|j| (j.label.as_str(), j.resource)))
    }
}

/// Copy `field` from the row written by an earlier step into this step's values before writing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyLink {
    pub field: String,
    pub step: usize,
    pub source_field: String,
}

/// One write in an atomic batch. Steps run in order; a failure rolls back the whole batch.
#[derive(Clone, Debug)]
pub enum WriteStep<'a> {
    Insert {
        resource: &'a ResourceType,
        values: Record,
        link: Option<KeyLink>,
    },
    Update {
        resource: &'a ResourceType,
        key: Value,
        values: Record,
    },
    Delete {
        resource: &'a ResourceType,
        key: Value,
    },
}

impl<'a> WriteStep<'a> {
    pub fn resource(&self) -> &'a ResourceType {
        match self {
            WriteStep::Insert { resource, .. }
            | WriteStep::Update { resource, .. }
            | WriteStep::Delete { resource, .. } => resource,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn joined_row_exposes_parts_by_label() {
        let row = Row::Joined(vec![
            ("posts".into(), record(json!({ "id": 10, "body": "b" }))),
            ("contents".into(), record(json!({ "id": 10, "title": null }))),
        ]);
        assert_eq!(row.value("posts", "body"), Some(&json!("b")));
        assert_eq!(row.value("contents", "title"), None);
        assert!(row.part("comments").is_none());
    }

    #[test]
    fn flat_row_answers_for_any_label() {
        let row = Row::Flat(record(json!({ "id": 1 })));
        assert_eq!(row.value("anything", "id"), Some(&json!(1)));
    }
}
