//! Read request parameters.

use super::relations::RelationSelector;
use crate::error::AppError;
use crate::settings::EngineSettings;
use serde_json::Value;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub descending: bool,
}

impl SortKey {
    /// `"-created_at,title"`: a leading `-` sorts descending.
    pub fn parse_list(raw: &str) -> Vec<SortKey> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty() && *s != "-")
            .map(|s| match s.strip_prefix('-') {
                Some(field) => SortKey { field: field.to_string(), descending: true },
                None => SortKey { field: s.to_string(), descending: false },
            })
            .collect()
    }
}

/// What the caller wants back from a collection or single-record read.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SearchRequest {
    pub relations: RelationSelector,
    /// 1-based.
    pub page: Option<u64>,
    pub per_page: Option<u64>,
    pub count_only: bool,
    /// Equality filters; fields may live on the resource or any ancestor.
    pub filters: Vec<(String, Value)>,
    pub sort: Vec<SortKey>,
}

impl SearchRequest {
    pub fn new() -> Self {
        SearchRequest::default()
    }

    pub fn with_relations(mut self, relations: RelationSelector) -> Self {
        self.relations = relations;
        self
    }

    pub fn with_page(mut self, page: u64, per_page: u64) -> Self {
        self.page = Some(page);
        self.per_page = Some(per_page);
        self
    }

    pub fn with_filter(mut self, field: impl Into<String>, value: Value) -> Self {
        self.filters.push((field.into(), value));
        self
    }

    pub fn relationship_selector(&self) -> &RelationSelector {
        &self.relations
    }

    pub fn is_pager_requested(&self) -> bool {
        self.page.is_some() || self.per_page.is_some()
    }

    pub fn is_count_only(&self) -> bool {
        self.count_only
    }

    /// Requested size clamped to `1..=max_page_size`; the configured default when absent.
    pub fn page_size(&self, settings: &EngineSettings) -> u64 {
        self.per_page
            .unwrap_or(settings.default_page_size)
            .clamp(1, settings.max_page_size.max(1))
    }

    /// Rows to skip for the requested page. Pages whose offset leaves the `i64` range are rejected.
    pub fn offset(&self, settings: &EngineSettings) -> Result<u64, AppError> {
        let page = self.page.unwrap_or(1).max(1);
        (page - 1)
            .checked_mul(self.page_size(settings))
            .filter(|offset| i64::try_from(*offset).is_ok())
            .ok_or_else(|| AppError::BadRequest(format!("invalid page {}", page)))
    }

    pub fn primary_filter(&self) -> Option<(&str, &Value)> {
        self.filters.first().map(|(f, v)| (f.as_str(), v))
    }
}
