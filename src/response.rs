//! Side-loaded response payload: table name -> records, plus optional `meta`.

use crate::query::Record;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Meta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<u64>,
    pub total_record_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub returned_record_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_time_ms: Option<u64>,
}

/// Query diagnostics for one response build.
#[derive(Clone, Copy, Debug, Default)]
pub struct Diagnostics {
    pub query_count: u64,
    pub elapsed: Duration,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResponsePayload {
    tables: BTreeMap<String, Vec<Record>>,
    meta: Option<Meta>,
}

impl ResponsePayload {
    pub fn new() -> Self {
        ResponsePayload::default()
    }

    /// Make `table` present even when nothing gets pushed to it.
    pub fn ensure_table(&mut self, table: &str) {
        self.tables.entry(table.to_string()).or_default();
    }

    /// Append `record` to `table`. Unless `skip_duplicate_check`, a record equal to one already in
    /// the table (same keys, same values, any order) is dropped. Returns the stored position.
    pub fn push(&mut self, table: &str, record: Record, skip_duplicate_check: bool) -> Option<usize> {
        let rows = self.tables.entry(table.to_string()).or_default();
        if !skip_duplicate_check {
            if let Some(existing) = rows.iter().position(|r| *r == record) {
                tracing::trace!(table, position = existing, "duplicate record suppressed");
                return None;
            }
        }
        rows.push(record);
        Some(rows.len() - 1)
    }

    pub fn records(&self, table: &str) -> &[Record] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn record_mut(&mut self, table: &str, position: usize) -> Option<&mut Record> {
        self.tables.get_mut(table).and_then(|rows| rows.get_mut(position))
    }

    pub fn tables(&self) -> impl Iterator<Item = (&str, &[Record])> {
        self.tables.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn meta(&self) -> Option<&Meta> {
        self.meta.as_ref()
    }

    /// Count-only responses: just the total.
    pub fn set_total(&mut self, total: u64) {
        self.meta.get_or_insert_with(Meta::default).total_record_count = total;
    }

    /// Paging totals, and query diagnostics when given.
    pub fn append_meta(&mut self, total: u64, page_size: u64, returned: u64, diagnostics: Option<Diagnostics>) {
        let total_pages = if page_size == 0 { 0 } else { total.div_ceil(page_size) };
        let meta = self.meta.get_or_insert_with(Meta::default);
        meta.total_pages = Some(total_pages);
        meta.total_record_count = total;
        meta.returned_record_count = Some(returned);
        if let Some(d) = diagnostics {
            meta.query_count = Some(d.query_count);
            meta.query_time_ms = Some(d.elapsed.as_millis() as u64);
        }
    }

    /// Diagnostics without paging (single record or unpaged list).
    pub fn append_diagnostics(&mut self, diagnostics: Diagnostics) {
        let meta = self.meta.get_or_insert_with(Meta::default);
        meta.query_count = Some(diagnostics.query_count);
        meta.query_time_ms = Some(diagnostics.elapsed.as_millis() as u64);
    }
}

impl Serialize for ResponsePayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = self.tables.len() + usize::from(self.meta.is_some());
        let mut map = serializer.serialize_map(Some(len))?;
        for (table, rows) in &self.tables {
            map.serialize_entry(table, rows)?;
        }
        if let Some(meta) = &self.meta {
            map.serialize_entry("meta", meta)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn identical_records_are_stored_once() {
        let mut payload = ResponsePayload::new();
        assert_eq!(payload.push("comments", record(json!({ "id": 5, "text": "a" })), false), Some(0));
        assert_eq!(payload.push("comments", record(json!({ "text": "a", "id": 5 })), false), None);
        assert_eq!(payload.records("comments").len(), 1);
    }

    #[test]
    fn skipping_the_check_keeps_duplicates() {
        let mut payload = ResponsePayload::new();
        payload.push("posts", record(json!({ "id": 1 })), true);
        payload.push("posts", record(json!({ "id": 1 })), true);
        assert_eq!(payload.records("posts").len(), 2);
    }

    #[test]
    fn records_differing_in_one_field_are_both_kept() {
        let mut payload = ResponsePayload::new();
        payload.push("comments", record(json!({ "id": 5, "text": "a" })), false);
        payload.push("comments", record(json!({ "id": 5, "text": "b" })), false);
        payload.push("comments", record(json!({ "id": 5 })), false);
        assert_eq!(payload.records("comments").len(), 3);
    }

    #[test]
    fn meta_rounds_pages_up_and_serializes_alongside_tables() {
        let mut payload = ResponsePayload::new();
        payload.ensure_table("posts");
        payload.append_meta(21, 10, 10, None);
        let meta = payload.meta().unwrap();
        assert_eq!(meta.total_pages, Some(3));
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({
                "posts": [],
                "meta": { "total_pages": 3, "total_record_count": 21, "returned_record_count": 10 }
            })
        );
    }
}
