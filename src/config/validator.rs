//! Config validation: referential integrity and acyclic parent chains.

use crate::config::{FullConfig, ResourceConfig};
use crate::error::ConfigError;
use std::collections::{HashMap, HashSet};

/// True when `field` is a known column, or when columns are not known yet (introspected later).
fn has_column(resource: &ResourceConfig, field: &str) -> bool {
    resource.columns.is_empty() || resource.columns.iter().any(|c| c.name == field)
}

fn require<'a>(
    by_name: &HashMap<&str, &'a ResourceConfig>,
    kind: &'static str,
    name: &str,
) -> Result<&'a ResourceConfig, ConfigError> {
    by_name.get(name).copied().ok_or_else(|| ConfigError::MissingReference {
        kind,
        id: name.to_string(),
    })
}

fn require_column(resource: &ResourceConfig, field: &str) -> Result<(), ConfigError> {
    if has_column(resource, field) {
        Ok(())
    } else {
        Err(ConfigError::MissingReference {
            kind: "column",
            id: format!("{}.{}", resource.name, field),
        })
    }
}

pub fn validate(config: &FullConfig) -> Result<(), ConfigError> {
    let mut by_name: HashMap<&str, &ResourceConfig> = HashMap::new();
    for r in &config.resources {
        if by_name.insert(r.name.as_str(), r).is_some() {
            return Err(ConfigError::DuplicateResource(r.name.clone()));
        }
    }

    for r in &config.resources {
        if !has_column(r, &r.primary_key) {
            return Err(ConfigError::InvalidPrimaryKey {
                resource: r.name.clone(),
                column: r.primary_key.clone(),
            });
        }
        if let Some(parent) = &r.parent {
            require(&by_name, "parent resource", parent.resource())?;
        }
    }

    for r in &config.resources {
        check_acyclic(r, &by_name)?;
    }

    for rel in &config.relationships {
        let owner = require(&by_name, "resource", &rel.resource)?;
        let referenced = require(&by_name, "resource", &rel.references)?;
        require_column(owner, &rel.local_field)?;
        require_column(referenced, &rel.referenced_field)?;

        let is_through = rel.kind.eq_ignore_ascii_case("has_many_through");
        match (&rel.through, is_through) {
            (Some(through), _) => {
                let intermediate = require(&by_name, "through resource", &through.resource)?;
                require_column(intermediate, &through.local_field)?;
                require_column(intermediate, &through.referenced_field)?;
            }
            (None, true) => {
                return Err(ConfigError::MissingReference {
                    kind: "through",
                    id: format!("{}.{}", rel.resource, rel.references),
                })
            }
            (None, false) => {}
        }

        if let Some(declared) = &rel.parent {
            let actual = referenced.parent.as_ref().map(|p| p.resource());
            if actual != Some(declared.as_str()) {
                return Err(ConfigError::MissingReference {
                    kind: "parent of referenced resource",
                    id: format!("{} -> {}", rel.references, declared),
                });
            }
        }
    }

    Ok(())
}

fn check_acyclic<'a>(
    start: &'a ResourceConfig,
    by_name: &HashMap<&str, &'a ResourceConfig>,
) -> Result<(), ConfigError> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut path: Vec<&str> = vec![start.name.as_str()];
    seen.insert(start.name.as_str());
    let mut current = start;
    while let Some(parent) = &current.parent {
        let name = parent.resource();
        path.push(name);
        if !seen.insert(name) {
            return Err(ConfigError::CyclicParentChain(path.join(" -> ")));
        }
        current = require(by_name, "parent resource", name)?;
    }
    Ok(())
}
