use proptest::prelude::*;

use veracity_core::models::{Dependency, DependencyStrength};
use veracity_core::stage::StageId;

/// A random acyclic stage graph over ids `1..=stage_count`
#[derive(Debug, Clone)]
pub struct GraphCase {
    pub stage_count: u16,
    pub dependencies: Vec<Dependency>,
}

pub fn strength_strategy() -> impl Strategy<Value = DependencyStrength> {
    prop_oneof![
        Just(DependencyStrength::Weak),
        Just(DependencyStrength::Medium),
        Just(DependencyStrength::Strong),
        Just(DependencyStrength::Critical),
    ]
}

/// Edges only point from a higher id to a lower one, so every graph is a DAG
pub fn dag_strategy() -> impl Strategy<Value = GraphCase> {
    (2u16..=8).prop_flat_map(|stage_count| {
        let edge = (1..=stage_count, 1..=stage_count, strength_strategy(), any::<bool>())
            .prop_filter("no self-loops", |(a, b, _, _)| a != b)
            .prop_map(|(a, b, strength, required)| {
                let (dependent, depends_on) = if a > b { (a, b) } else { (b, a) };
                Dependency::new(StageId(dependent), [StageId(depends_on)], strength, required)
            });
        prop::collection::vec(edge, 0..12).prop_map(move |dependencies| GraphCase {
            stage_count,
            dependencies,
        })
    })
}

/// Subset of `1..=8` to enable; may name ids outside a smaller graph
pub fn enabled_subset_strategy() -> impl Strategy<Value = Vec<bool>> {
    prop::collection::vec(any::<bool>(), 8)
}
