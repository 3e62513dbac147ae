//! Shared blog fixture: posts inherit from contents, with comments, tags, stats and authors.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use sideload_sdk::config::Relationship;
use sideload_sdk::{
    resolve, AppError, EngineSettings, Executor, FullConfig, MemoryExecutor, Record, RelationHook, ResourceService,
};
use std::sync::Arc;

pub fn blog_config() -> FullConfig {
    serde_json::from_value(json!({
        "resources": [
            { "name": "contents", "primary_key": "id", "block_columns": ["secret"],
              "columns": [
                  { "name": "id", "type": "bigint", "nullable": false, "default": "nextval" },
                  { "name": "title", "type": "text", "nullable": false },
                  { "name": "secret", "type": "text" }
              ] },
            { "name": "posts", "primary_key": "id", "parent": "contents",
              "columns": [
                  { "name": "id", "type": "bigint", "nullable": false },
                  { "name": "body", "type": "text" },
                  { "name": "author_id", "type": "bigint" }
              ] },
            { "name": "comments", "primary_key": "id",
              "columns": [
                  { "name": "id", "type": "bigint", "nullable": false, "default": "nextval" },
                  { "name": "post_id", "type": "bigint" },
                  { "name": "text", "type": "text" }
              ] },
            { "name": "users", "primary_key": "id", "block_columns": ["password_hash"],
              "columns": [
                  { "name": "id", "type": "bigint", "nullable": false, "default": "nextval" },
                  { "name": "name", "type": "text" },
                  { "name": "password_hash", "type": "text" }
              ] },
            { "name": "tags", "primary_key": "id",
              "columns": [{ "name": "id", "type": "bigint" }, { "name": "label", "type": "text" }] },
            { "name": "post_tags", "primary_key": "id",
              "columns": [
                  { "name": "id", "type": "bigint" },
                  { "name": "post_id", "type": "bigint" },
                  { "name": "tag_id", "type": "bigint" }
              ] },
            { "name": "post_stats", "primary_key": "id", "block_columns": ["post_id"],
              "columns": [
                  { "name": "id", "type": "bigint" },
                  { "name": "post_id", "type": "bigint" },
                  { "name": "views", "type": "integer" }
              ] },
            { "name": "bookmarks", "primary_key": "id",
              "columns": [
                  { "name": "id", "type": "bigint" },
                  { "name": "user_id", "type": "bigint" },
                  { "name": "post_id", "type": "bigint" }
              ] }
        ],
        "relationships": [
            { "resource": "posts", "kind": "has_many", "alias": "responses", "local_field": "id",
              "references": "comments", "referenced_field": "post_id" },
            { "resource": "posts", "kind": "belongs_to", "alias": "author", "local_field": "author_id",
              "references": "users", "referenced_field": "id" },
            { "resource": "posts", "kind": "has_many_through", "local_field": "id",
              "references": "tags", "referenced_field": "id",
              "through": { "resource": "post_tags", "local_field": "post_id", "referenced_field": "tag_id" } },
            { "resource": "posts", "kind": "has_one", "local_field": "id",
              "references": "post_stats", "referenced_field": "post_id" },
            { "resource": "posts", "kind": "has_many", "alias": "mentions", "local_field": "id",
              "references": "users", "referenced_field": "id", "custom": true },
            { "resource": "comments", "kind": "belongs_to", "local_field": "post_id",
              "references": "posts", "referenced_field": "id" },
            { "resource": "users", "kind": "has_many_through", "alias": "saved_posts", "local_field": "id",
              "references": "posts", "referenced_field": "id",
              "through": { "resource": "bookmarks", "local_field": "user_id", "referenced_field": "post_id" } }
        ]
    }))
    .unwrap()
}

pub fn seeded_executor() -> Arc<MemoryExecutor> {
    let executor = MemoryExecutor::new();
    executor.seed(
        "contents",
        [
            json!({ "id": 10, "title": "Hello", "secret": "s1" }),
            json!({ "id": 11, "title": "Second", "secret": "s2" }),
        ],
    );
    executor.seed(
        "posts",
        [
            json!({ "id": 10, "body": "first body", "author_id": 1 }),
            json!({ "id": 11, "body": "second body", "author_id": null }),
        ],
    );
    executor.seed(
        "comments",
        [
            json!({ "id": 5, "post_id": 10, "text": "a" }),
            json!({ "id": 6, "post_id": 10, "text": "b" }),
            json!({ "id": 7, "post_id": 99, "text": "orphan" }),
        ],
    );
    executor.seed("users", [json!({ "id": 1, "name": "ann", "password_hash": "x" })]);
    executor.seed("tags", [json!({ "id": 1, "label": "rust" }), json!({ "id": 2, "label": "db" })]);
    executor.seed(
        "post_tags",
        [
            json!({ "id": 1, "post_id": 10, "tag_id": 2 }),
            json!({ "id": 2, "post_id": 10, "tag_id": 1 }),
            json!({ "id": 3, "post_id": 11, "tag_id": 2 }),
        ],
    );
    executor.seed("post_stats", [json!({ "id": 1, "post_id": 10, "views": 3 })]);
    executor.seed(
        "bookmarks",
        [
            json!({ "id": 1, "user_id": 1, "post_id": 11 }),
            json!({ "id": 2, "user_id": 1, "post_id": 10 }),
        ],
    );
    Arc::new(executor)
}

/// Comments replying to comments through `parent_id`.
pub fn thread_config() -> FullConfig {
    serde_json::from_value(json!({
        "resources": [
            { "name": "comments", "primary_key": "id",
              "columns": [
                  { "name": "id", "type": "bigint", "nullable": false, "default": "nextval" },
                  { "name": "parent_id", "type": "bigint" },
                  { "name": "text", "type": "text" }
              ] }
        ],
        "relationships": [
            { "resource": "comments", "kind": "has_many", "alias": "replies", "local_field": "id",
              "references": "comments", "referenced_field": "parent_id" }
        ]
    }))
    .unwrap()
}

pub fn thread_executor() -> Arc<MemoryExecutor> {
    let executor = MemoryExecutor::new();
    executor.seed(
        "comments",
        [
            json!({ "id": 1, "parent_id": null, "text": "root" }),
            json!({ "id": 2, "parent_id": 1, "text": "first reply" }),
            json!({ "id": 3, "parent_id": 1, "text": "second reply" }),
        ],
    );
    Arc::new(executor)
}

pub fn thread_service(executor: Arc<MemoryExecutor>, settings: EngineSettings) -> ResourceService {
    let model = resolve(&thread_config()).unwrap();
    ResourceService::new(Arc::new(model), executor, settings)
}

/// Every post mentions user 1.
pub struct MentionHook;

#[async_trait]
impl RelationHook for MentionHook {
    async fn load(&self, _relation: &Relationship, _owner: &Record, _executor: &dyn Executor) -> Result<Vec<Record>, AppError> {
        Ok(vec![json!({ "id": 1, "name": "ann", "password_hash": "x" })
            .as_object()
            .cloned()
            .unwrap_or_default()])
    }
}

pub fn service_with(executor: Arc<MemoryExecutor>, settings: EngineSettings) -> ResourceService {
    let model = resolve(&blog_config()).unwrap();
    ResourceService::new(Arc::new(model), executor, settings).with_hook("posts", "mentions", Arc::new(MentionHook))
}

pub fn service(settings: EngineSettings) -> ResourceService {
    service_with(seeded_executor(), settings)
}

pub fn attributes(value: Value) -> Value {
    json!({ "attributes": value })
}
