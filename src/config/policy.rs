//! Column access policy: which columns of a resource may be serialized.

use std::collections::HashSet;

/// Allow/block split for one resource. Built once when the registry is resolved; the block list
/// already contains every ancestor's block list.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ColumnPolicy {
    allowed: Vec<String>,
    blocked: Vec<String>,
}

impl ColumnPolicy {
    /// `inherited` is the parent's effective block list (empty for roots).
    pub fn derive<'a>(
        columns: impl IntoIterator<Item = &'a str>,
        inherited: &[String],
        own: &[String],
    ) -> Self {
        let mut blocked: Vec<String> = Vec::with_capacity(inherited.len() + own.len());
        for name in inherited.iter().chain(own) {
            if !blocked.contains(name) {
                blocked.push(name.clone());
            }
        }
        let blocked_set: HashSet<&str> = blocked.iter().map(String::as_str).collect();
        let allowed = columns
            .into_iter()
            .filter(|c| !blocked_set.contains(c))
            .map(str::to_string)
            .collect();
        ColumnPolicy { allowed, blocked }
    }

    pub fn allowed(&self) -> &[String] {
        &self.allowed
    }

    pub fn blocked(&self) -> &[String] {
        &self.blocked
    }

    pub fn is_allowed(&self, column: &str) -> bool {
        self.allowed.iter().any(|c| c == column)
    }

    pub fn is_blocked(&self, column: &str) -> bool {
        self.blocked.iter().any(|c| c == column)
    }

    /// Allowed columns, optionally as `table.column`.
    pub fn allowed_columns(&self, table: &str, include_prefix: bool) -> Vec<String> {
        if include_prefix {
            self.allowed.iter().map(|c| format!("{}.{}", table, c)).collect()
        } else {
            self.allowed.clone()
        }
    }
}
