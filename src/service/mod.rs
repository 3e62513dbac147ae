//! ResourceService: side-loaded reads and chain-aware writes over any [`Executor`].

pub mod assembler;
mod finder;
pub mod relations;
mod search;
mod validation;
pub mod writer;

pub use finder::FindContext;
pub use relations::{ActiveRelation, ActiveRelations, RelationSelector, RelationSet};
pub use search::{SearchRequest, SortKey};
pub use validation::RequestValidator;
pub use writer::{ModelChain, PipelineState, SaveMode, SavePipeline};

use crate::config::{Relationship, ResolvedModel, ResourceType};
use crate::error::AppError;
use crate::query::{Executor, Record};
use crate::response::ResponsePayload;
use crate::settings::EngineSettings;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Loader for relationships flagged `custom`: the engine hands over the owning record and
/// side-loads (or merges, for has-one) whatever comes back.
#[async_trait]
pub trait RelationHook: Send + Sync {
    async fn load(
        &self,
        relation: &Relationship,
        owner: &Record,
        executor: &dyn Executor,
    ) -> Result<Vec<Record>, AppError>;
}

/// Hooks by `owner.key`.
pub type HookRegistry = HashMap<String, Arc<dyn RelationHook>>;

pub(crate) fn hook_key(owner: &str, key: &str) -> String {
    format!("{}.{}", owner, key)
}

pub struct ResourceService {
    model: Arc<ResolvedModel>,
    executor: Arc<dyn Executor>,
    settings: EngineSettings,
    hooks: HookRegistry,
}

impl ResourceService {
    pub fn new(model: Arc<ResolvedModel>, executor: Arc<dyn Executor>, settings: EngineSettings) -> Self {
        ResourceService {
            model,
            executor,
            settings,
            hooks: HookRegistry::new(),
        }
    }

    /// Register the loader for custom relationship `key` on `owner`.
    pub fn with_hook(mut self, owner: &str, key: &str, hook: Arc<dyn RelationHook>) -> Self {
        self.hooks.insert(hook_key(owner, key), hook);
        self
    }

    pub fn model(&self) -> &ResolvedModel {
        &self.model
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn resource(&self, name: &str) -> Result<&ResourceType, AppError> {
        self.model
            .resource(name)
            .ok_or_else(|| AppError::NotFound(format!("resource {}", name)))
    }

    fn context<'a>(&'a self, resource: &'a ResourceType) -> FindContext<'a> {
        FindContext::new(&self.model, resource, self.executor.as_ref(), &self.settings, &self.hooks)
    }

    /// Collection read. `None` when an unpaged read matched nothing.
    pub async fn find(&self, resource: &str, search: &SearchRequest) -> Result<Option<ResponsePayload>, AppError> {
        let resource = self.resource(resource)?;
        self.context(resource).find(search).await
    }

    /// Single record by primary key. `None` when it does not exist.
    pub async fn find_first(
        &self,
        resource: &str,
        id: &Value,
        selector: &RelationSelector,
    ) -> Result<Option<ResponsePayload>, AppError> {
        let resource = self.resource(resource)?;
        self.context(resource).find_first(id, selector).await
    }

    /// Insert (`id` absent) or update `data` (`{"attributes": {...}}`) across the parent chain.
    /// Returns the saved record's primary key.
    pub async fn save(&self, resource: &str, data: &Value, id: Option<Value>) -> Result<Value, AppError> {
        let resource = self.resource(resource)?;
        SavePipeline::new(&self.model, resource, self.executor.as_ref())
            .save(data, id)
            .await
    }

    /// Delete the record and its ancestor rows.
    pub async fn delete(&self, resource: &str, id: &Value) -> Result<(), AppError> {
        let resource = self.resource(resource)?;
        writer::delete_chain(&self.model, resource, self.executor.as_ref(), id).await
    }
}
