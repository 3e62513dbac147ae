//! Runtime switches for the response engine, read from the environment.

use std::str::FromStr;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineSettings {
    /// Collect has-many keys across all primary rows and issue one query per relationship.
    pub batch_has_many: bool,
    /// Add query count and elapsed time to `meta`.
    pub diagnostics: bool,
    /// Page size when a page is requested without an explicit size.
    pub default_page_size: u64,
    /// Upper bound on any page size, and on unpaged collection reads.
    pub max_page_size: u64,
    /// Key single-record responses by the singular table name ("post") instead of the plural.
    pub singular_record_key: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            batch_has_many: true,
            diagnostics: false,
            default_page_size: 20,
            max_page_size: 1000,
            singular_record_key: true,
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(var = name, value = %raw, "ignoring unparsable setting");
            default
        }),
        Err(_) => default,
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(raw) => matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

impl EngineSettings {
    /// `SIDELOAD_BATCH_HAS_MANY`, `SIDELOAD_DIAGNOSTICS`, `SIDELOAD_DEFAULT_PAGE_SIZE`,
    /// `SIDELOAD_MAX_PAGE_SIZE`, `SIDELOAD_SINGULAR_RECORD_KEY`.
    pub fn from_env() -> Self {
        let defaults = EngineSettings::default();
        let max_page_size = env_or("SIDELOAD_MAX_PAGE_SIZE", defaults.max_page_size).max(1);
        EngineSettings {
            batch_has_many: env_flag("SIDELOAD_BATCH_HAS_MANY", defaults.batch_has_many),
            diagnostics: env_flag("SIDELOAD_DIAGNOSTICS", defaults.diagnostics),
            default_page_size: env_or("SIDELOAD_DEFAULT_PAGE_SIZE", defaults.default_page_size).clamp(1, max_page_size),
            max_page_size,
            singular_record_key: env_flag("SIDELOAD_SINGULAR_RECORD_KEY", defaults.singular_record_key),
        }
    }
}
