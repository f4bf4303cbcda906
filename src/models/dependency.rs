//! Stage dependency edges.

use serde::{Deserialize, Serialize};

use crate::stage::StageId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyStrength {
    Weak,
    Medium,
    Strong,
    Critical,
}

/// Directed edge `dependent -> depends_on[]`.
///
/// Every edge orders execution. Only required strong/critical edges gate it:
/// the dependent is skipped unless each dependency completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub dependent: StageId,
    pub depends_on: Vec<StageId>,
    pub strength: DependencyStrength,
    pub required: bool,
}

impl Dependency {
    pub fn new(
        dependent: StageId,
        depends_on: impl IntoIterator<Item = StageId>,
        strength: DependencyStrength,
        required: bool,
    ) -> Self {
        Self {
            dependent,
            depends_on: depends_on.into_iter().collect(),
            strength,
            required,
        }
    }

    /// Required strong or critical edge
    pub fn is_hard(&self) -> bool {
        self.required && self.strength >= DependencyStrength::Strong
    }
}
