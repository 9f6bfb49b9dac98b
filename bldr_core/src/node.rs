use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::target::{Target, TargetId};

/// Runtime status of a [`BuildNode`]. `Cached`, `Success` and `Failed` are
/// terminal for a given dispatch; retry resets a `Failed` node back to
/// `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildStatus {
    Pending,
    Building,
    Success,
    Cached,
    Failed,
}

impl BuildStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BuildStatus::Success | BuildStatus::Cached | BuildStatus::Failed
        )
    }

    pub fn is_satisfied(self) -> bool {
        matches!(self, BuildStatus::Success | BuildStatus::Cached)
    }
}

/// A runtime wrapper around a [`Target`] inside a [`crate::BuildGraph`] (not
/// defined in this crate to avoid a cyclic dependency; see `bldr_graph`).
/// Created by the graph builder, mutated only through graph-level or
/// scheduler operations, and destroyed with its graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildNode {
    pub target: Target,
    pub depth: u32,
    pub status: BuildStatus,
    pub hash: String,
    pub deps: BTreeSet<TargetId>,
    pub dependents: BTreeSet<TargetId>,
}

impl BuildNode {
    pub fn new(target: Target) -> Self {
        let deps = target.deps.iter().cloned().collect();
        BuildNode {
            target,
            depth: 0,
            status: BuildStatus::Pending,
            hash: String::new(),
            deps,
            dependents: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> &TargetId {
        self.target.id()
    }
}
