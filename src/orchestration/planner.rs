//! # Wave Planner
//!
//! Kahn-style topological layering of the enabled stages. Every stage whose
//! in-edges (from other enabled stages) are all satisfied by earlier waves
//! lands in the next wave. Edges pointing at stages that are not enabled do
//! not affect ordering; hard edges of that kind make the dependent skip at
//! execution time instead.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::stage::{StageId, StageRegistry};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionPlan {
    /// Waves in execution order; stages within a wave are independent
    pub waves: Vec<Vec<StageId>>,
    /// Every declared upstream stage, any strength
    pub upstream: BTreeMap<StageId, BTreeSet<StageId>>,
    /// Upstream stages that must complete (required strong/critical edges)
    pub hard: BTreeMap<StageId, BTreeSet<StageId>>,
}

impl ExecutionPlan {
    pub fn stage_count(&self) -> usize {
        self.waves.iter().map(Vec::len).sum()
    }

    pub fn wave_of(&self, stage: StageId) -> Option<usize> {
        self.waves.iter().position(|wave| wave.contains(&stage))
    }

    pub fn hard_dependencies(&self, stage: StageId) -> impl Iterator<Item = StageId> + '_ {
        self.hard.get(&stage).into_iter().flatten().copied()
    }

    pub fn upstream_of(&self, stage: StageId) -> impl Iterator<Item = StageId> + '_ {
        self.upstream.get(&stage).into_iter().flatten().copied()
    }
}

/// Compute the execution waves for `enabled`.
///
/// Unknown stage ids and dependency cycles among enabled stages are
/// configuration errors.
pub fn plan(registry: &StageRegistry, enabled: &BTreeSet<StageId>) -> OrchestratorResult<ExecutionPlan> {
    if let Some(unknown) = enabled.iter().find(|id| !registry.contains(**id)) {
        return Err(OrchestratorError::Configuration(format!(
            "stage {unknown} is enabled but not registered"
        )));
    }

    let mut plan = ExecutionPlan::default();
    for dependency in registry.dependencies() {
        if !enabled.contains(&dependency.dependent) {
            continue;
        }
        for depends_on in &dependency.depends_on {
            if *depends_on == dependency.dependent {
                return Err(OrchestratorError::Configuration(format!(
                    "stage {depends_on} depends on itself"
                )));
            }
            plan.upstream
                .entry(dependency.dependent)
                .or_default()
                .insert(*depends_on);
            if dependency.is_hard() {
                plan.hard
                    .entry(dependency.dependent)
                    .or_default()
                    .insert(*depends_on);
            }
        }
    }

    let mut in_degree: BTreeMap<StageId, usize> = enabled.iter().map(|id| (*id, 0)).collect();
    let mut downstream: BTreeMap<StageId, Vec<StageId>> = BTreeMap::new();
    for (dependent, upstream) in &plan.upstream {
        for depends_on in upstream.iter().filter(|id| enabled.contains(id)) {
            *in_degree.entry(*dependent).or_default() += 1;
            downstream.entry(*depends_on).or_default().push(*dependent);
        }
    }

    let mut ready: Vec<StageId> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut placed = 0;

    while !ready.is_empty() {
        let mut next = Vec::new();
        for stage in &ready {
            for dependent in downstream.get(stage).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        next.push(*dependent);
                    }
                }
            }
        }
        placed += ready.len();
        next.sort();
        plan.waves.push(std::mem::replace(&mut ready, next));
    }

    if placed != enabled.len() {
        let cyclic: Vec<String> = in_degree
            .iter()
            .filter(|(_, degree)| **degree > 0)
            .map(|(id, _)| id.to_string())
            .collect();
        return Err(OrchestratorError::Configuration(format!(
            "dependency cycle among stages [{}]",
            cyclic.join(", ")
        )));
    }

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Dependency, DependencyStrength};
    use crate::test_helpers::ScriptedStage;
    use std::sync::Arc;

    fn registry(ids: &[u16], edges: &[(u16, u16, DependencyStrength, bool)]) -> StageRegistry {
        let mut registry = StageRegistry::new();
        for id in ids {
            registry
                .register(Arc::new(ScriptedStage::succeeding(*id, &format!("s{id}"), 1.0)))
                .unwrap();
        }
        for (dependent, depends_on, strength, required) in edges {
            registry.add_dependency(Dependency::new(
                StageId(*dependent),
                [StageId(*depends_on)],
                *strength,
                *required,
            ));
        }
        registry
    }

    fn enabled(ids: &[u16]) -> BTreeSet<StageId> {
        ids.iter().map(|id| StageId(*id)).collect()
    }

    #[test]
    fn test_independent_stages_share_a_wave() {
        let registry = registry(&[1, 2, 3], &[]);
        let plan = plan(&registry, &enabled(&[1, 2, 3])).unwrap();
        assert_eq!(plan.waves, vec![vec![StageId(1), StageId(2), StageId(3)]]);
    }

    #[test]
    fn test_chain_produces_one_wave_per_stage() {
        use DependencyStrength::*;
        let registry = registry(&[1, 2, 3], &[(2, 1, Strong, true), (3, 2, Weak, false)]);
        let plan = plan(&registry, &enabled(&[1, 2, 3])).unwrap();

        assert_eq!(plan.waves.len(), 3);
        assert_eq!(plan.wave_of(StageId(3)), Some(2));
        assert_eq!(plan.hard_dependencies(StageId(2)).collect::<Vec<_>>(), vec![StageId(1)]);
        assert_eq!(plan.hard_dependencies(StageId(3)).count(), 0);
        assert_eq!(plan.upstream_of(StageId(3)).collect::<Vec<_>>(), vec![StageId(2)]);
    }

    #[test]
    fn test_edges_to_disabled_stages_do_not_order() {
        use DependencyStrength::*;
        let registry = registry(&[1, 2], &[(2, 1, Critical, true)]);
        let plan = plan(&registry, &enabled(&[2])).unwrap();

        assert_eq!(plan.waves, vec![vec![StageId(2)]]);
        assert_eq!(plan.hard_dependencies(StageId(2)).collect::<Vec<_>>(), vec![StageId(1)]);
    }

    #[test]
    fn test_cycle_is_configuration_error() {
        use DependencyStrength::*;
        let registry = registry(&[1, 2, 3], &[(1, 2, Medium, false), (2, 1, Medium, false)]);
        let err = plan(&registry, &enabled(&[1, 2, 3])).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_unknown_stage_is_configuration_error() {
        let registry = registry(&[1], &[]);
        let err = plan(&registry, &enabled(&[1, 9])).unwrap_err();
        assert!(matches!(err, OrchestratorError::Configuration(_)));
    }

    #[test]
    fn test_empty_enabled_set_has_no_waves() {
        let registry = registry(&[1], &[]);
        let plan = plan(&registry, &BTreeSet::new()).unwrap();
        assert!(plan.waves.is_empty());
        assert_eq!(plan.stage_count(), 0);
    }
}
