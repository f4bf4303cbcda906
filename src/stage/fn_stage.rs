//! Closure-backed stage, for wiring small synchronous stages without a new type.

use async_trait::async_trait;
use std::fmt;

use super::{Stage, StageContext, StageId, StageInput, StageOutput};
use crate::error::StageError;
use crate::models::Dependency;

type StageFn = dyn Fn(&StageContext, &StageInput) -> Result<StageOutput, StageError> + Send + Sync;

pub struct FnStage {
    id: StageId,
    name: String,
    dependencies: Vec<Dependency>,
    cacheable: bool,
    func: Box<StageFn>,
}

impl FnStage {
    pub fn new<F>(id: StageId, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&StageContext, &StageInput) -> Result<StageOutput, StageError> + Send + Sync + 'static,
    {
        Self {
            id,
            name: name.into(),
            dependencies: Vec::new(),
            cacheable: false,
            func: Box::new(func),
        }
    }

    pub fn with_dependency(mut self, dependency: Dependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn with_cache(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable;
        self
    }
}

impl fmt::Debug for FnStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnStage")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

#[async_trait]
impl Stage for FnStage {
    fn id(&self) -> StageId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn dependencies(&self) -> Vec<Dependency> {
        self.dependencies.clone()
    }

    fn cacheable(&self) -> bool {
        self.cacheable
    }

    async fn run(&self, ctx: &StageContext, input: &StageInput) -> Result<StageOutput, StageError> {
        (self.func)(ctx, input)
    }
}
