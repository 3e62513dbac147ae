//! Request validation from config rules and column nullability.

use crate::config::{ResourceType, ValidationRule};
use crate::error::FieldErrors;
use crate::query::Record;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

pub struct RequestValidator;

impl RequestValidator {
    /// Validate body against per-column rules. All required fields must be present.
    pub fn validate(body: &Record, rules: &HashMap<String, ValidationRule>, errors: &mut FieldErrors) {
        for (col, rule) in rules {
            let val = body.get(col);
            if rule.required == Some(true) && val.map_or(true, Value::is_null) {
                errors.add(col, format!("{} is required", col));
                continue;
            }
            if let Some(v) = val {
                validate_field(col, v, rule, errors);
            }
        }
    }

    /// Validate only the fields present in body (for updates). Required is not enforced for missing fields.
    pub fn validate_partial(body: &Record, rules: &HashMap<String, ValidationRule>, errors: &mut FieldErrors) {
        for (col, v) in body {
            if let Some(rule) = rules.get(col) {
                if rule.required == Some(true) && v.is_null() {
                    errors.add(col, format!("{} is required", col));
                    continue;
                }
                validate_field(col, v, rule, errors);
            }
        }
    }

    /// Non-null columns without a DB default must be supplied on insert. `supplied` lists
    /// columns filled in by the write itself (the parent link).
    pub fn required_columns(resource: &ResourceType, values: &Record, supplied: &[&str], errors: &mut FieldErrors) {
        for col in &resource.columns {
            if col.nullable || col.has_default || supplied.contains(&col.name.as_str()) {
                continue;
            }
            if values.get(&col.name).map_or(true, Value::is_null) {
                errors.add(&col.name, format!("{} is required", col.name));
            }
        }
    }

    /// Present values may not null out a non-null column.
    pub fn non_null_columns(resource: &ResourceType, values: &Record, errors: &mut FieldErrors) {
        for (name, value) in values {
            if !value.is_null() {
                continue;
            }
            if resource.column(name).is_some_and(|c| !c.nullable) {
                errors.add(name, format!("{} cannot be null", name));
            }
        }
    }
}

fn validate_field(col: &str, v: &Value, rule: &ValidationRule, errors: &mut FieldErrors) {
    if v.is_null() {
        return;
    }
    if let Some(format) = &rule.format {
        if let Some(msg) = check_format(col, v, format) {
            errors.add(col, msg);
        }
    }
    if let (Some(max), Some(s)) = (rule.max_length, v.as_str()) {
        if s.chars().count() > max as usize {
            errors.add(col, format!("{} must be at most {} characters", col, max));
        }
    }
    if let (Some(min), Some(s)) = (rule.min_length, v.as_str()) {
        if s.chars().count() < min as usize {
            errors.add(col, format!("{} must be at least {} characters", col, min));
        }
    }
    if let Some(ref pattern) = rule.pattern {
        match Regex::new(pattern) {
            Ok(re) => {
                if let Some(s) = v.as_str() {
                    if !re.is_match(s) {
                        errors.add(col, format!("{} does not match required pattern", col));
                    }
                }
            }
            Err(_) => errors.add(col, format!("invalid pattern for {}", col)),
        }
    }
    if let Some(ref allowed) = rule.allowed {
        if !allowed.iter().any(|a| value_eq(v, a)) {
            errors.add(
                col,
                format!("{} must be one of: {:?}", col, allowed.iter().take(5).collect::<Vec<_>>()),
            );
        }
    }
    if let (Some(min), Some(n)) = (rule.minimum, v.as_f64()) {
        if n < min {
            errors.add(col, format!("{} must be at least {}", col, min));
        }
    }
    if let (Some(max), Some(n)) = (rule.maximum, v.as_f64()) {
        if n > max {
            errors.add(col, format!("{} must be at most {}", col, max));
        }
    }
}

fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(s), Value::String(t)) => s == t,
        (Value::Number(n), Value::Number(m)) => n.as_f64() == m.as_f64(),
        _ => a == b,
    }
}

fn check_format(col: &str, v: &Value, format: &str) -> Option<String> {
    let s = v.as_str()?;
    match format.to_lowercase().as_str() {
        "email" if !s.contains('@') || s.len() < 3 => Some(format!("{} must be a valid email", col)),
        "uuid" if uuid::Uuid::parse_str(s).is_err() => Some(format!("{} must be a valid UUID", col)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rules(value: Value) -> HashMap<String, ValidationRule> {
        serde_json::from_value(value).unwrap()
    }

    fn body(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn collects_every_failing_field() {
        let rules = rules(json!({
            "title": { "required": true },
            "email": { "format": "email" },
            "status": { "allowed": ["draft", "live"] }
        }));
        let mut errors = FieldErrors::new();
        RequestValidator::validate(&body(json!({ "email": "nope", "status": "gone" })), &rules, &mut errors);
        assert_eq!(errors.get("title").unwrap(), ["title is required".to_string()]);
        assert!(errors.get("email").is_some());
        assert!(errors.get("status").is_some());
    }

    #[test]
    fn partial_skips_absent_required_fields() {
        let rules = rules(json!({ "title": { "required": true, "max_length": 3 } }));
        let mut errors = FieldErrors::new();
        RequestValidator::validate_partial(&body(json!({ "body": "x" })), &rules, &mut errors);
        assert!(errors.is_empty());
        RequestValidator::validate_partial(&body(json!({ "title": "long" })), &rules, &mut errors);
        assert_eq!(errors.get("title").unwrap()[0], "title must be at most 3 characters");
    }
}
