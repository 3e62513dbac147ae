//! Naming helpers for resource keys: plural -> singular, and the `_ids` linkage field.

/// Best-effort English singular of a snake_case plural ("comments" -> "comment",
/// "categories" -> "category"). Config can always override it.
pub fn singularize(word: &str) -> String {
    if let Some(stem) = word.strip_suffix("ies") {
        if !stem.is_empty() {
            return format!("{}y", stem);
        }
    }
    for suffix in ["sses", "shes", "ches", "xes", "zes", "uses"] {
        if word.ends_with(suffix) {
            return word[..word.len() - 2].to_string();
        }
    }
    if word.ends_with("ss") || word.ends_with("us") || word.ends_with("is") {
        return word.to_string();
    }
    word.strip_suffix('s').unwrap_or(word).to_string()
}

/// Linkage field name for a has-many edge: "response" -> "response_ids".
pub fn ids_field(singular: &str) -> String {
    format!("{}_ids", singular)
}
