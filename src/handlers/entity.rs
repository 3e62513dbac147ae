//! Resource handlers: list, read, create, update, delete.

use crate::config::{ColumnInfo, PkType, ResolvedModel, ResourceType};
use crate::error::AppError;
use crate::response::ResponsePayload;
use crate::service::{RelationSelector, SearchRequest, SortKey};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::Value;
use std::collections::HashMap;

fn parse_id(id_str: &str, pk_type: &PkType) -> Result<Value, AppError> {
    Ok(match pk_type {
        PkType::Uuid => {
            let u = uuid::Uuid::parse_str(id_str).map_err(|_| AppError::BadRequest("invalid uuid".into()))?;
            Value::String(u.to_string())
        }
        PkType::BigInt | PkType::Int => {
            let n: i64 = id_str.parse().map_err(|_| AppError::BadRequest("invalid id".into()))?;
            Value::Number(n.into())
        }
        PkType::Text => Value::String(id_str.to_string()),
    })
}

/// Column `col` on the resource or the nearest ancestor carrying it.
fn column_info<'a>(model: &'a ResolvedModel, resource: &'a ResourceType, col: &str) -> Option<&'a ColumnInfo> {
    resource.column(col).or_else(|| {
        model
            .parent_chain(&resource.name)
            .ok()?
            .into_iter()
            .find_map(|r| r.column(col))
    })
}

fn query_value_for_column(column: &ColumnInfo, s: &str) -> Value {
    let pg_type = column.pg_type.as_deref().unwrap_or("").to_lowercase();
    if pg_type.contains("uuid") {
        if let Ok(u) = uuid::Uuid::parse_str(s) {
            return Value::String(u.to_string());
        }
    }
    if pg_type.contains("int") || pg_type.contains("serial") {
        if let Ok(n) = s.parse::<i64>() {
            return Value::Number(n.into());
        }
    }
    if pg_type.starts_with("numeric") || pg_type.starts_with("double") || pg_type == "real" {
        if let Some(n) = s.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
            return Value::Number(n);
        }
    }
    if pg_type.starts_with("bool") {
        if s.eq_ignore_ascii_case("true") {
            return Value::Bool(true);
        }
        if s.eq_ignore_ascii_case("false") {
            return Value::Bool(false);
        }
    }
    Value::String(s.to_string())
}

fn flag(v: &str) -> bool {
    matches!(v.to_lowercase().as_str(), "1" | "true" | "yes")
}

/// `include`, `page`, `per_page`, `count_only` and `sort` are reserved; other known columns filter.
fn search_from_params(model: &ResolvedModel, resource: &ResourceType, params: HashMap<String, String>) -> Result<SearchRequest, AppError> {
    let mut search = SearchRequest::new();
    for (k, v) in params {
        match k.as_str() {
            "include" => search.relations = v.parse().unwrap_or_default(),
            "page" => {
                search.page = Some(v.parse().map_err(|_| AppError::BadRequest("invalid page".into()))?);
            }
            "per_page" => {
                search.per_page = Some(v.parse().map_err(|_| AppError::BadRequest("invalid per_page".into()))?);
            }
            "count_only" => search.count_only = flag(&v),
            "sort" => search.sort = SortKey::parse_list(&v),
            _ => {
                if let Some(column) = column_info(model, resource, &k) {
                    let val = query_value_for_column(column, &v);
                    search.filters.push((k, val));
                }
            }
        }
    }
    // Stable filter order regardless of query string order.
    search.filters.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(search)
}

/// `{"attributes": {...}}` with blocked columns removed. Clients never write blocked columns.
fn strip_blocked(resource: &ResourceType, mut body: Value) -> Result<Value, AppError> {
    let attributes = body
        .get_mut("attributes")
        .and_then(Value::as_object_mut)
        .ok_or_else(|| AppError::BadRequest("body must carry an \"attributes\" object".into()))?;
    attributes.retain(|k, _| !resource.policy.is_blocked(k));
    Ok(body)
}

async fn saved_record(state: &AppState, resource: &str, id: &Value) -> Result<ResponsePayload, AppError> {
    state
        .service
        .find_first(resource, id, &RelationSelector::None)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("{} {}", resource, id)))
}

pub async fn list(
    State(state): State<AppState>,
    Path(resource_name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    let resource = state.service.resource(&resource_name)?;
    let search = search_from_params(state.service.model(), resource, params)?;
    let payload = match state.service.find(&resource_name, &search).await? {
        Some(payload) => payload,
        None => {
            let mut empty = ResponsePayload::new();
            empty.ensure_table(&resource.table);
            empty
        }
    };
    Ok((StatusCode::OK, Json(payload)))
}

pub async fn read(
    State(state): State<AppState>,
    Path((resource_name, id_str)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    let resource = state.service.resource(&resource_name)?;
    let id = parse_id(&id_str, &resource.pk_type)?;
    let selector: RelationSelector = params
        .get("include")
        .map(|v| v.parse().unwrap_or_default())
        .unwrap_or_default();
    let payload = state
        .service
        .find_first(&resource_name, &id, &selector)
        .await?
        .ok_or_else(|| AppError::NotFound(id_str))?;
    Ok((StatusCode::OK, Json(payload)))
}

pub async fn create(
    State(state): State<AppState>,
    Path(resource_name): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    let resource = state.service.resource(&resource_name)?;
    let body = strip_blocked(resource, body)?;
    let id = state.service.save(&resource_name, &body, None).await?;
    let payload = saved_record(&state, &resource_name, &id).await?;
    Ok((StatusCode::CREATED, Json(payload)))
}

pub async fn update(
    State(state): State<AppState>,
    Path((resource_name, id_str)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    let resource = state.service.resource(&resource_name)?;
    let id = parse_id(&id_str, &resource.pk_type)?;
    let body = strip_blocked(resource, body)?;
    let id = state.service.save(&resource_name, &body, Some(id)).await?;
    let payload = saved_record(&state, &resource_name, &id).await?;
    Ok((StatusCode::OK, Json(payload)))
}

pub async fn delete(
    State(state): State<AppState>,
    Path((resource_name, id_str)): Path<(String, String)>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    let resource = state.service.resource(&resource_name)?;
    let id = parse_id(&id_str, &resource.pk_type)?;
    state.service.delete(&resource_name, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
