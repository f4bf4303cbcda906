//! # Stage Registry
//!
//! Lookup-by-id for registered stages plus their declared dependency edges.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::{Stage, StageId};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::models::Dependency;

#[derive(Debug, Default, Clone)]
pub struct StageRegistry {
    stages: BTreeMap<StageId, Arc<dyn Stage>>,
    extra_dependencies: Vec<Dependency>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stage. Duplicate ids are rejected.
    pub fn register(&mut self, stage: Arc<dyn Stage>) -> OrchestratorResult<()> {
        let id = stage.id();
        if let Some(existing) = self.stages.get(&id) {
            return Err(OrchestratorError::Configuration(format!(
                "stage id {id} already registered as '{}'",
                existing.name()
            )));
        }

        info!(stage_id = %id, stage = %stage.name(), "Registered stage");
        self.stages.insert(id, stage);
        Ok(())
    }

    /// Add an edge that is not declared by the stage itself
    pub fn add_dependency(&mut self, dependency: Dependency) {
        debug!(
            dependent = %dependency.dependent,
            depends_on = ?dependency.depends_on,
            "Registered extra dependency"
        );
        self.extra_dependencies.push(dependency);
    }

    pub fn get(&self, id: StageId) -> Option<Arc<dyn Stage>> {
        self.stages.get(&id).cloned()
    }

    pub fn contains(&self, id: StageId) -> bool {
        self.stages.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = StageId> + '_ {
        self.stages.keys().copied()
    }

    pub fn stages(&self) -> impl Iterator<Item = &Arc<dyn Stage>> {
        self.stages.values()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Every dependency edge: stage-declared edges followed by extra edges
    pub fn dependencies(&self) -> Vec<Dependency> {
        self.stages
            .values()
            .flat_map(|stage| stage.dependencies())
            .chain(self.extra_dependencies.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DependencyStrength;
    use crate::stage::{FnStage, QualityReport, StageOutput};

    fn stage(id: u16, name: &str) -> Arc<dyn Stage> {
        Arc::new(FnStage::new(StageId(id), name, |_ctx, _input| {
            Ok(StageOutput::new(serde_json::json!({}), QualityReport::new(1.0, 1.0)))
        }))
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = StageRegistry::new();
        registry.register(stage(1, "first")).unwrap();
        let err = registry.register(stage(1, "second")).unwrap_err();
        assert!(err.to_string().contains("first"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_lookup_and_dependencies() {
        let mut registry = StageRegistry::new();
        registry.register(stage(1, "a")).unwrap();
        registry.register(stage(2, "b")).unwrap();
        registry.add_dependency(Dependency::new(
            StageId(2),
            [StageId(1)],
            DependencyStrength::Strong,
            true,
        ));

        assert_eq!(registry.get(StageId(2)).map(|s| s.name().to_string()), Some("b".into()));
        assert!(registry.get(StageId(9)).is_none());
        assert_eq!(registry.dependencies().len(), 1);
        assert_eq!(registry.ids().collect::<Vec<_>>(), vec![StageId(1), StageId(2)]);
    }
}
