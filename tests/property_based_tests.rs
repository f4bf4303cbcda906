//! Property-based tests for wave planning and aggregation

mod common;

use proptest::prelude::*;
use std::collections::BTreeSet;
use uuid::Uuid;

use common::strategies::{dag_strategy, enabled_subset_strategy};
use veracity_core::models::{OverallStatus, StageResult, StageStatus};
use veracity_core::orchestration::{plan, Aggregator};
use veracity_core::stage::StageId;
use veracity_core::test_helpers::ScriptedStage;

fn status_strategy() -> impl Strategy<Value = StageStatus> {
    prop_oneof![
        Just(StageStatus::Completed),
        Just(StageStatus::Failed),
        Just(StageStatus::Timeout),
        Just(StageStatus::Skipped),
    ]
}

proptest! {
    #[test]
    fn waves_respect_every_enabled_edge(graph in dag_strategy(), mask in enabled_subset_strategy()) {
        let mut registry = common::registry_of(
            (1..=graph.stage_count).map(|id| ScriptedStage::succeeding(id, &format!("stage_{id}"), 0.9)),
        );
        for dependency in &graph.dependencies {
            registry.add_dependency(dependency.clone());
        }
        let enabled: BTreeSet<StageId> = (1..=graph.stage_count)
            .filter(|id| mask[usize::from(*id) - 1])
            .map(StageId)
            .collect();

        let plan = plan(&registry, &enabled).unwrap();

        prop_assert_eq!(plan.stage_count(), enabled.len());
        for stage in &enabled {
            prop_assert!(plan.wave_of(*stage).is_some());
        }
        for wave in &plan.waves {
            prop_assert!(!wave.is_empty());
        }
        for dependency in &graph.dependencies {
            if !enabled.contains(&dependency.dependent) {
                continue;
            }
            for upstream in dependency.depends_on.iter().filter(|id| enabled.contains(id)) {
                prop_assert!(plan.wave_of(*upstream) < plan.wave_of(dependency.dependent));
            }
        }
    }

    #[test]
    fn planning_is_deterministic(graph in dag_strategy()) {
        let mut registry = common::registry_of(
            (1..=graph.stage_count).map(|id| ScriptedStage::succeeding(id, &format!("stage_{id}"), 0.9)),
        );
        for dependency in &graph.dependencies {
            registry.add_dependency(dependency.clone());
        }
        let enabled: BTreeSet<StageId> = (1..=graph.stage_count).map(StageId).collect();

        prop_assert_eq!(plan(&registry, &enabled).unwrap(), plan(&registry, &enabled).unwrap());
    }

    #[test]
    fn aggregate_status_follows_completion_ratio(
        statuses in prop::collection::vec(status_strategy(), 0..10),
        quality in 0.0f64..=1.0,
    ) {
        let results: Vec<StageResult> = statuses
            .iter()
            .enumerate()
            .map(|(index, status)| {
                let mut result = StageResult::pending(StageId(index as u16 + 1), format!("s{index}"));
                result.status = *status;
                result.quality = quality;
                result.accuracy = quality;
                result
            })
            .collect();

        let outcome = Aggregator::new().aggregate(Uuid::new_v4(), results);
        let enabled = statuses.len();
        let completed = statuses.iter().filter(|s| **s == StageStatus::Completed).count();
        let skipped = statuses.iter().filter(|s| **s == StageStatus::Skipped).count();

        prop_assert_eq!(outcome.completed, completed);
        prop_assert_eq!(outcome.blended_score.is_some(), completed > 0);
        if let Some(score) = outcome.blended_score {
            prop_assert!((score - quality).abs() < 1e-9);
        }
        let expected = if enabled == 0 {
            OverallStatus::Success
        } else if completed == 0 {
            OverallStatus::Failure
        } else if completed == enabled - skipped {
            OverallStatus::Success
        } else if completed * 2 >= enabled {
            OverallStatus::Partial
        } else {
            OverallStatus::Failure
        };
        prop_assert_eq!(outcome.status, expected);
    }
}
